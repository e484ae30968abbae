//! The `Environment` seam: the one external collaborator this crate
//! consumes rather than implements (spec §6). An agent runtime would supply
//! its own `Environment`; a standalone caller uses [`LocalEnvironment`].
//!
//! Timer-thread hosting is intentionally not an `Environment` method: the
//! three engines (`WheelEngine`/`ListEngine`/`HeapEngine`) are distinct
//! concrete types, and `TimerThread::spawn` is generic over `TimerEngine` —
//! a trait object can't express "spawn whichever engine the caller picked"
//! without either an enum of all three or boxing `dyn TimerEngine`, both of
//! which would cost the zero-overhead dispatch the wheel/heap engines exist
//! for. Callers host their own `TimerThread<E>` directly (see `timer::thread`)
//! and only reach into `Environment` for the chain/clock/sink/tracer seam.

use std::sync::Arc;

use crate::chain::{Chain, ChainParams};
use crate::clock::{Clock, SystemClock};
use crate::sink::{ExceptionSink, LoggingExceptionSink};
use crate::tracer::{NullTracer, Tracer};

/// What an agent runtime, a dispatcher, or a standalone caller must supply
/// for this crate's chains/selectors to run (spec §6 "Consumed").
pub trait Environment: Send + Sync {
    /// Build a chain configured by `params`, tagged with this environment's
    /// tracer.
    fn create_chain(&self, params: ChainParams) -> Chain;

    /// Where handler/action panics are reported.
    fn exception_sink(&self) -> Arc<dyn ExceptionSink>;

    /// The monotonic clock `receive`/`select`/timers measure against.
    fn clock(&self) -> Arc<dyn Clock>;

    /// The data-plane tracer hook (spec §6 "Tracer").
    fn tracer(&self) -> Arc<dyn Tracer>;
}

/// The default, in-process `Environment`: a real clock, a logging exception
/// sink, and no tracer unless one is supplied. Exists so this crate is
/// usable standalone, without a hosting agent runtime (the agent runtime
/// itself is out of scope, spec §1).
pub struct LocalEnvironment {
    exception_sink: Arc<dyn ExceptionSink>,
    clock: Arc<dyn Clock>,
    tracer: Arc<dyn Tracer>,
}

impl Default for LocalEnvironment {
    fn default() -> Self {
        LocalEnvironment {
            exception_sink: Arc::new(LoggingExceptionSink),
            clock: Arc::new(SystemClock),
            tracer: Arc::new(NullTracer),
        }
    }
}

impl LocalEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exception_sink(mut self, sink: Arc<dyn ExceptionSink>) -> Self {
        self.exception_sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }
}

impl Environment for LocalEnvironment {
    fn create_chain(&self, params: ChainParams) -> Chain {
        Chain::new(params.with_tracer(self.tracer.clone()))
    }

    fn exception_sink(&self) -> Arc<dyn ExceptionSink> {
        self.exception_sink.clone()
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn tracer(&self) -> Arc<dyn Tracer> {
        self.tracer.clone()
    }
}
