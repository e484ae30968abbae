//! Chain construction parameters.

use std::sync::Arc;
use std::time::Duration;

use crate::tracer::{NullTracer, Tracer};

/// Storage mode for a bounded chain. Both modes are externally identical —
/// preallocated storage is a performance hint (spec §4.2: "Both are
/// observable as the same external behaviour").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Grow on demand, up to `capacity`.
    Dynamic,
    /// Reserve all storage at construction.
    Preallocated,
}

/// Chain capacity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded { size: usize, storage: Storage },
}

/// What happens when a bounded chain is full and a producer pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Silently discard the incoming message.
    DropNewest,
    /// Discard the oldest queued message to make room.
    DropOldest,
    /// Raise `ChainError::Overflow`.
    Throw,
    /// Terminate the process (fatal, logged).
    Abort,
    /// Block the producer up to `Duration`, waiting for space.
    Wait(Duration),
}

/// Builder for [`Chain`](super::Chain) construction parameters.
pub struct ChainParams {
    pub(crate) capacity: Capacity,
    pub(crate) overflow: OverflowPolicy,
    pub(crate) single_consumer: bool,
    pub(crate) not_empty_notificator: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) tracer: Arc<dyn Tracer>,
}

impl ChainParams {
    pub fn unbounded() -> Self {
        ChainParams {
            capacity: Capacity::Unbounded,
            overflow: OverflowPolicy::DropNewest,
            single_consumer: false,
            not_empty_notificator: None,
            tracer: Arc::new(NullTracer),
        }
    }

    pub fn bounded(size: usize, storage: Storage) -> Self {
        ChainParams {
            capacity: Capacity::Bounded { size, storage },
            overflow: OverflowPolicy::Throw,
            single_consumer: false,
            not_empty_notificator: None,
            tracer: Arc::new(NullTracer),
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Mark this chain as single-consumer, allowing mutable messages onto
    /// it (spec §3: "a mutable payload may be enqueued only into
    /// single-consumer chains").
    pub fn with_single_consumer(mut self, single_consumer: bool) -> Self {
        self.single_consumer = single_consumer;
        self
    }

    pub fn with_not_empty_notificator(mut self, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.not_empty_notificator = Some(callback);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }
}
