//! Error types raised by programmer misuse.
//!
//! Expected, high-volume outcomes (a full chain, an empty extract, a closed
//! chain) are never represented here — those are plain status enums returned
//! by value from `push`/`extract`/`receive`/`select`. `ChainError` is reserved
//! for conditions that indicate the caller broke an invariant.

use thiserror::Error;

/// Result alias used throughout the crate for fallible, non-status operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Sum type of every raised (non-status) error this crate produces.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Overflow policy was `throw` and the chain was full.
    #[error("mchain #{chain_id} is full (capacity {capacity})")]
    Overflow { chain_id: u64, capacity: usize },

    /// A selector (prepared or extensible) was activated while already active.
    #[error("selector is already active on another thread")]
    AlreadyActive,

    /// `add_cases` was called on an extensible selector while it was active.
    #[error("cannot modify an extensible selector while it is active")]
    ExtensibleSelectModifyActive,

    /// A mutable message was pushed into a chain configured for more than
    /// one consumer.
    #[error("mutable message of type `{type_name}` cannot be sent to a multi-consumer mchain")]
    MutabilityViolation { type_name: &'static str },

    /// `send_periodic` was requested for a mutable message with a non-zero
    /// period.
    #[error("periodic delivery of a mutable message `{type_name}` is not allowed")]
    InvalidPeriodic { type_name: &'static str },

    /// `activate` was called on a timer that was not `inactive`.
    #[error("timer must be inactive before it can be activated")]
    TimerNotDeactivated,

    /// `reschedule`/`deactivate` raced with a timer currently executing its
    /// action (status `pending_exec`/`pending_deactivation`).
    #[error("timer is currently being processed by the engine")]
    TimerInProcessing,

    /// `request_value` timed out waiting for a reply.
    #[error("no result was produced before the wait expired")]
    NoResult,
}
