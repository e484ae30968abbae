//! The exception sink: where handler, stop-predicate, and timer-action panics
//! are reported.
//!
//! Propagation policy (spec §7): a panicking handler or timer action is
//! caught at the engine boundary and reported here; the enclosing loop
//! continues unless the sink requests termination. A panicking stop-predicate
//! always aborts the call, regardless of what the sink returns — callers
//! only consult the sink for logging in that case.

use std::fmt;

/// Where a caught panic originated, for sink implementations that want to
/// react differently per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicSource {
    /// A `receive`/`select` handler panicked while processing a message.
    Handler,
    /// A `stop_on` predicate panicked.
    StopPredicate,
    /// A timer action panicked while firing.
    TimerAction,
}

/// Sink for exceptions/panics caught at the loop boundary.
pub trait ExceptionSink: Send + Sync {
    /// Called with a human-readable description of the panic payload.
    /// Return `true` to request that the enclosing `receive`/`select`/timer
    /// loop terminate instead of continuing.
    fn on_panic(&self, source: PanicSource, message: &str) -> bool;
}

/// Default sink: logs via `tracing` and never requests termination (matches
/// the original engine's "processing continues" default for action panics).
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionSink;

impl ExceptionSink for LoggingExceptionSink {
    fn on_panic(&self, source: PanicSource, message: &str) -> bool {
        tracing::error!(?source, message, "caught panic at loop boundary");
        false
    }
}

impl fmt::Debug for dyn ExceptionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn ExceptionSink")
    }
}

/// Extract a printable message from a `catch_unwind` payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
