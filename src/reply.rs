//! The single-shot reply slot used by the service-request envelope, and the
//! future/promise pair built on top of it (`request_future`/`request_value`
//! in `send.rs`).
//!
//! The slot is built from a `Mutex` + `Condvar` rather than a third-party
//! oneshot channel so it shares the same predicate-based, sentinel-free wait
//! discipline as chains (spec §4.4: "Infinite wait must be implemented
//! without a sentinel... use the chain's condition variable with
//! predicate-based wait", generalized here to the reply slot).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{ChainError, ChainResult};

struct SlotState<T> {
    value: Option<T>,
    /// Set once the requester has given up waiting or the chain hosting the
    /// request was closed with no reply forthcoming.
    abandoned: bool,
}

struct Inner<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

/// The producer side of a single-shot reply: fulfilled at most once, by the
/// handler that processes the originating service-request message.
pub struct ReplySlot<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ReplySlot<T> {
    fn clone(&self) -> Self {
        ReplySlot {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ReplySlot<T> {
    fn new() -> Self {
        ReplySlot {
            inner: Arc::new(Inner {
                state: Mutex::new(SlotState {
                    value: None,
                    abandoned: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Fulfil the slot. A slot can only be fulfilled once; subsequent calls
    /// are ignored (mirrors the chain's close-is-idempotent spirit: fulfilling
    /// twice has the same observable effect as fulfilling once).
    pub fn fulfill(&self, value: T) {
        let mut state = self.inner.state.lock();
        if state.value.is_none() {
            state.value = Some(value);
            self.inner.ready.notify_all();
        }
    }

    pub(crate) fn mark_abandoned(&self) {
        let mut state = self.inner.state.lock();
        if state.value.is_none() {
            state.abandoned = true;
            self.inner.ready.notify_all();
        }
    }
}

/// The consumer side of a single-shot reply: returned by `request_future`.
pub struct ReplyFuture<T> {
    inner: Arc<Inner<T>>,
}

/// Construct a fresh, unfulfilled request/reply pair.
pub fn channel<T>() -> (ReplySlot<T>, ReplyFuture<T>) {
    let slot = ReplySlot::new();
    let future = ReplyFuture {
        inner: slot.inner.clone(),
    };
    (slot, future)
}

impl<T> ReplyFuture<T> {
    /// Block until a reply is available, with no deadline.
    pub fn wait(self) -> ChainResult<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.abandoned {
                return Err(ChainError::NoResult);
            }
            self.inner.ready.wait(&mut state);
        }
    }

    /// Block until a reply is available or `timeout` elapses.
    pub fn wait_timeout(self, timeout: Duration) -> ChainResult<T> {
        let mut state = self.inner.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.abandoned {
                return Err(ChainError::NoResult);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(ChainError::NoResult);
            }
            let remaining = deadline - now;
            let timed_out = self.inner.ready.wait_for(&mut state, remaining).timed_out();
            if timed_out && state.value.is_none() {
                return Err(ChainError::NoResult);
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        state.value.take()
    }
}

/// Payload of a `send_request` / `request_future` message: the request value
/// plus the reply slot the handler must fulfil.
pub struct ServiceRequest<Req, Resp> {
    pub request: Req,
    pub reply: ReplySlot<Resp>,
}

impl<Req, Resp> ServiceRequest<Req, Resp> {
    pub fn reply(&self, value: Resp) {
        self.reply.fulfill(value);
    }
}
