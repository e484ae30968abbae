//! Multi-channel message exchange: typed message chains (mchains), the
//! `receive` and `select` extraction operations, and a pluggable timer
//! engine (wheel / ordered-list / heap) that feeds delayed and periodic
//! messages into chains.
//!
//! This crate is the message-chain core of an in-process actor/agent
//! framework, lifted out on its own: agent lifecycle, subscription storage,
//! dispatcher scheduling, and tracer output formatting live elsewhere and
//! are not this crate's concern. What's here is the hardest part — the
//! concurrency-correct multi-producer/multi-consumer queue, its
//! termination-clause-rich extraction operations, and the scheduler that
//! feeds it from the future.
//!
//! Start with [`environment::LocalEnvironment`] to build chains, then
//! [`receive::receive`] or [`select::select`] to read from them, and
//! [`send`] for the producer side.

// Restriction lints apply to library code only: `#[cfg(test)]` modules
// throughout the crate use `.unwrap()` freely, since a panicking assertion
// is the right failure mode for a test.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod autoclose;
pub mod chain;
pub mod clock;
pub mod environment;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod receive;
pub mod reply;
pub mod select;
pub mod send;
pub mod sink;
pub mod timer;
pub mod tracer;

pub use autoclose::{auto_close_drop_content, auto_close_retain_content, AutoClose, Retention};
pub use chain::{Capacity, Chain, ChainId, ChainParams, ChainStats, ExtractionStatus, OverflowPolicy, PushMode, PushOutcome, Storage};
pub use clock::{Clock, Deadline, RemainingTime, SystemClock};
pub use environment::{Environment, LocalEnvironment};
pub use envelope::{Envelope, Mutability, TypeTag};
pub use error::{ChainError, ChainResult};
pub use handler::{on, on_mut, BoxHandler, Mhood, MutableMhood};
pub use receive::{receive, ReceiveParams, ReceiveResult, StopReason, WaitPolicy};
pub use reply::{ReplyFuture, ReplySlot, ServiceRequest};
pub use select::{
    add_cases, select, select_prepared, ExtensibleSelect, PreparedSelect, SelectCase, SelectParams, SelectResult,
};
pub use send::{request_future, request_value, send, send_delayed, send_mutable, send_periodic, send_periodic_mutable};
pub use sink::{ExceptionSink, LoggingExceptionSink, PanicSource};
pub use timer::{TimerAction, TimerEngine, TimerEngineConfig, TimerId, TimerStatus};
pub use tracer::{LoggingTracer, NullTracer, Tracer};
