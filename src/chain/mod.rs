//! The message chain (mchain): a typed multi-producer/multi-consumer FIFO
//! with configurable capacity, overflow policy, optional producer
//! back-pressure, and close semantics with content retention.

mod config;
mod stats;

pub use config::{ChainParams, Capacity, OverflowPolicy, Storage};
pub use stats::ChainStats;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::envelope::{Envelope, Mutability, TypeTag};
use crate::error::{ChainError, ChainResult};
use crate::tracer::Tracer;

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically-increasing chain identifier, used by the tracer
/// hooks and by diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mchain#{}", self.0)
    }
}

/// How a message was pushed — distinguishes calls made on behalf of the
/// timer engine, which must never block a timer tick waiting for space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// A normal producer call.
    Ordinary,
    /// The timer engine delivering a fired delayed/periodic message. Must
    /// skip `wait(timeout)` overflow handling and behave as `drop_newest`
    /// instead (spec §5: "Producers from the timer engine must skip the
    /// blocking wait").
    FromTimer,
    /// A push into a preallocated-storage chain. Externally identical to
    /// `Ordinary` — preallocated vs dynamic storage is a performance hint,
    /// not an observable difference (spec §4.2) — kept as a distinct
    /// variant so callers can record intent and so a future preallocated
    /// engine has a seam to special-case without changing the public API.
    PreallocatedOnly,
}

/// Outcome of a single `push` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The message is now in the queue.
    Stored,
    /// A producer-side wait is in progress; internal only — `push` never
    /// returns this to a caller, it is resolved into `Stored`/`NotStored`/
    /// `ChainClosed` before returning. Promoted to a public variant because
    /// `select`'s send-case contract depends on observing it (spec §9, open
    /// question).
    Deferred,
    /// The overflow policy dropped the message (`drop_newest`, or
    /// `drop_newest`-equivalent behavior for a timer-engine push).
    NotStored,
    /// The chain was already closed.
    ChainClosed,
}

/// Outcome of a single `extract` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// A message was removed from the queue.
    MsgExtracted,
    /// The queue was empty but the chain is still open.
    NoMessages,
    /// The queue was empty and the chain is closed — no more messages will
    /// ever arrive.
    ChainClosed,
}

struct NotificatorEntry {
    id: u64,
    callback: Arc<dyn Fn() + Send + Sync>,
}

struct ChainState {
    queue: VecDeque<(TypeTag, Envelope)>,
    closed: bool,
}

struct ResolvedConfig {
    capacity: Capacity,
    overflow: OverflowPolicy,
    single_consumer: bool,
}

impl ResolvedConfig {
    fn capacity_limit(&self) -> Option<usize> {
        match self.capacity {
            Capacity::Unbounded => None,
            Capacity::Bounded { size, .. } => Some(size),
        }
    }
}

struct ChainInner {
    id: ChainId,
    config: ResolvedConfig,
    state: Mutex<ChainState>,
    not_empty: Condvar,
    not_full: Condvar,
    construction_notificator: Option<Arc<dyn Fn() + Send + Sync>>,
    dynamic_notificators: Mutex<Vec<NotificatorEntry>>,
    next_notificator_id: AtomicU64,
    stats: ChainStats,
    tracer: Arc<dyn Tracer>,
}

/// A cheaply-cloneable handle to a message chain.
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Clone for Chain {
    fn clone(&self) -> Self {
        Chain {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// RAII registration of a not-empty callback; removes itself from the
/// chain's dynamic notificator list on drop. Used by `select` to learn when
/// a chain it is watching transitions from empty to non-empty.
pub struct NotificatorGuard {
    chain: Arc<ChainInner>,
    id: u64,
}

impl Drop for NotificatorGuard {
    fn drop(&mut self) {
        let mut list = self.chain.dynamic_notificators.lock();
        list.retain(|entry| entry.id != self.id);
    }
}

impl Chain {
    pub(crate) fn new(params: ChainParams) -> Self {
        let id = ChainId(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed));
        let initial_capacity_hint = match params.capacity {
            Capacity::Unbounded => 16,
            Capacity::Bounded { size, storage: Storage::Preallocated } => size,
            Capacity::Bounded { .. } => 16,
        };
        let inner = ChainInner {
            id,
            config: ResolvedConfig {
                capacity: params.capacity,
                overflow: params.overflow,
                single_consumer: params.single_consumer,
            },
            state: Mutex::new(ChainState {
                queue: VecDeque::with_capacity(initial_capacity_hint),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            construction_notificator: params.not_empty_notificator,
            dynamic_notificators: Mutex::new(Vec::new()),
            next_notificator_id: AtomicU64::new(1),
            stats: ChainStats::default(),
            tracer: params.tracer,
        };
        tracing::debug!(chain_id = %id, "mchain created");
        Chain {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> ChainId {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.config.capacity_limit()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> &ChainStats {
        &self.inner.stats
    }

    /// Register a callback invoked at most once per empty->non-empty
    /// transition. Consumers must tolerate spurious wake-ups (spec §4.2).
    pub fn register_not_empty(&self, callback: Arc<dyn Fn() + Send + Sync>) -> NotificatorGuard {
        let id = self.inner.next_notificator_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .dynamic_notificators
            .lock()
            .push(NotificatorEntry { id, callback });
        NotificatorGuard {
            chain: self.inner.clone(),
            id,
        }
    }

    fn fire_notificators(&self) {
        if let Some(cb) = &self.inner.construction_notificator {
            cb();
        }
        let callbacks: Vec<_> = self
            .inner
            .dynamic_notificators
            .lock()
            .iter()
            .map(|e| e.callback.clone())
            .collect();
        for cb in callbacks {
            cb();
        }
    }

    /// Push one message, blocking the calling thread up to the configured
    /// `wait(timeout)` overflow policy if the chain is full. See spec §4.2
    /// for the full bounded-chain algorithm.
    #[tracing::instrument(level = "trace", skip(self, envelope))]
    pub fn push(&self, tag: TypeTag, envelope: Envelope, mode: PushMode) -> ChainResult<PushOutcome> {
        self.push_impl(tag, envelope, mode, true)
    }

    /// Push without ever blocking the calling thread: a chain configured
    /// with `wait(timeout)` that is currently full yields `Deferred` instead
    /// of waiting. Used by `select`'s send-cases, which must re-try on the
    /// next readiness signal rather than block the whole selector loop
    /// (spec §4.4: "a push that would block is treated as deferred and
    /// retried, never blocks the selector loop").
    pub fn try_push(&self, tag: TypeTag, envelope: Envelope, mode: PushMode) -> ChainResult<PushOutcome> {
        self.push_impl(tag, envelope, mode, false)
    }

    fn push_impl(&self, tag: TypeTag, envelope: Envelope, mode: PushMode, blocking: bool) -> ChainResult<PushOutcome> {
        if envelope.mutability() == Mutability::Mutable && !self.inner.config.single_consumer {
            return Err(ChainError::MutabilityViolation {
                type_name: tag.name(),
            });
        }

        let mut guard = self.inner.state.lock();
        if guard.closed {
            return Ok(PushOutcome::ChainClosed);
        }

        let Some(limit) = self.inner.config.capacity_limit() else {
            // Unbounded: always stored.
            let became_non_empty = guard.queue.is_empty();
            guard.queue.push_back((tag, envelope));
            self.inner.stats.record_push();
            drop(guard);
            self.inner.tracer.on_push(self.inner.id, tag);
            if became_non_empty {
                self.inner.not_empty.notify_all();
                self.fire_notificators();
            }
            return Ok(PushOutcome::Stored);
        };

        if guard.queue.len() < limit {
            let became_non_empty = guard.queue.is_empty();
            guard.queue.push_back((tag, envelope));
            self.inner.stats.record_push();
            drop(guard);
            self.inner.tracer.on_push(self.inner.id, tag);
            if became_non_empty {
                self.inner.not_empty.notify_all();
                self.fire_notificators();
            }
            return Ok(PushOutcome::Stored);
        }

        // Full. Apply overflow policy.
        match self.inner.config.overflow {
            OverflowPolicy::DropNewest => {
                drop(guard);
                self.inner.stats.record_overflow();
                self.inner.tracer.on_overflow(self.inner.id, tag);
                Ok(PushOutcome::NotStored)
            }
            OverflowPolicy::DropOldest => {
                guard.queue.pop_front();
                guard.queue.push_back((tag, envelope));
                self.inner.stats.record_push();
                self.inner.stats.record_overflow();
                drop(guard);
                self.inner.tracer.on_overflow(self.inner.id, tag);
                self.inner.tracer.on_push(self.inner.id, tag);
                // Length did not transition through empty, no notificator fire needed.
                Ok(PushOutcome::Stored)
            }
            OverflowPolicy::Throw => {
                drop(guard);
                self.inner.stats.record_overflow();
                self.inner.tracer.on_overflow(self.inner.id, tag);
                Err(ChainError::Overflow {
                    chain_id: self.inner.id.0,
                    capacity: limit,
                })
            }
            OverflowPolicy::Abort => {
                tracing::error!(chain_id = %self.inner.id, "mchain overflow with abort policy; terminating");
                std::process::abort();
            }
            OverflowPolicy::Wait(timeout) => {
                if mode == PushMode::FromTimer {
                    drop(guard);
                    self.inner.stats.record_overflow();
                    self.inner.tracer.on_overflow(self.inner.id, tag);
                    return Ok(PushOutcome::NotStored);
                }
                if !blocking {
                    drop(guard);
                    self.inner.stats.record_overflow();
                    self.inner.tracer.on_overflow(self.inner.id, tag);
                    return Ok(PushOutcome::Deferred);
                }
                self.push_wait_for_space(guard, tag, envelope, timeout, limit)
            }
        }
    }

    fn push_wait_for_space(
        &self,
        mut guard: MutexGuard<'_, ChainState>,
        tag: TypeTag,
        envelope: Envelope,
        timeout: Duration,
        limit: usize,
    ) -> ChainResult<PushOutcome> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if guard.closed {
                return Ok(PushOutcome::ChainClosed);
            }
            if guard.queue.len() < limit {
                let became_non_empty = guard.queue.is_empty();
                guard.queue.push_back((tag, envelope));
                self.inner.stats.record_push();
                drop(guard);
                self.inner.tracer.on_push(self.inner.id, tag);
                if became_non_empty {
                    self.inner.not_empty.notify_all();
                    self.fire_notificators();
                }
                return Ok(PushOutcome::Stored);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                self.inner.stats.record_overflow();
                self.inner.tracer.on_overflow(self.inner.id, tag);
                return Ok(PushOutcome::NotStored);
            }
            self.inner.not_full.wait_for(&mut guard, deadline - now);
        }
    }

    /// Non-blocking extraction. Waiting, if desired, is the caller's
    /// responsibility (`receive`/`select`), never the chain's.
    pub fn extract(&self) -> (ExtractionStatus, Option<(TypeTag, Envelope)>) {
        let mut guard = self.inner.state.lock();
        if let Some(item) = guard.queue.pop_front() {
            let became_empty_and_closed = guard.queue.is_empty() && guard.closed;
            drop(guard);
            self.inner.stats.record_extract();
            self.inner.tracer.on_extract(self.inner.id, item.0);
            self.inner.not_full.notify_all();
            let _ = became_empty_and_closed; // surfaced to receive/select via is_closed()
            (ExtractionStatus::MsgExtracted, Some(item))
        } else if guard.closed {
            (ExtractionStatus::ChainClosed, None)
        } else {
            (ExtractionStatus::NoMessages, None)
        }
    }

    /// Block until the chain is non-empty or closed, or `timeout` elapses.
    /// Returns `true` if the predicate was satisfied, `false` on timeout.
    /// `timeout = None` waits with no deadline (predicate-based, no
    /// sentinel time value, per spec §4.4).
    pub fn wait_not_empty_or_closed(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.inner.state.lock();
        match timeout {
            None => {
                while guard.queue.is_empty() && !guard.closed {
                    self.inner.not_empty.wait(&mut guard);
                }
                true
            }
            Some(d) => {
                let deadline = std::time::Instant::now() + d;
                while guard.queue.is_empty() && !guard.closed {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let result = self.inner.not_empty.wait_for(&mut guard, deadline - now);
                    if result.timed_out() && guard.queue.is_empty() && !guard.closed {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Close the chain. Idempotent: closing twice has the same observable
    /// effect as closing once.
    pub fn close(&self, retain_content: bool) {
        let mut guard = self.inner.state.lock();
        if guard.closed {
            return;
        }
        guard.closed = true;
        if !retain_content {
            guard.queue.clear();
        }
        drop(guard);
        self.inner.tracer.on_close(self.inner.id);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        self.fire_notificators();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    pub(super) fn unbounded() -> Chain {
        Chain::new(ChainParams::unbounded())
    }

    pub(super) fn bounded(n: usize, overflow: OverflowPolicy) -> Chain {
        Chain::new(ChainParams::bounded(n, Storage::Dynamic).with_overflow(overflow))
    }

    #[test]
    fn unbounded_push_extract_fifo() {
        let ch = unbounded();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary)
            .unwrap();
        let (status, item) = ch.extract();
        assert_eq!(status, ExtractionStatus::MsgExtracted);
        assert_eq!(item.unwrap().1.downcast_ref::<i32>(), Some(&1));
        let (status, item) = ch.extract();
        assert_eq!(status, ExtractionStatus::MsgExtracted);
        assert_eq!(item.unwrap().1.downcast_ref::<i32>(), Some(&2));
    }

    #[test]
    fn bounded_len_never_exceeds_capacity() {
        let ch = bounded(2, OverflowPolicy::DropNewest);
        for i in 0..10 {
            ch.push(TypeTag::of::<i32>(), Envelope::immutable(i), PushMode::Ordinary)
                .unwrap();
            assert!(ch.len() <= 2);
        }
    }

    #[test]
    fn drop_newest_keeps_oldest_two() {
        let ch = bounded(2, OverflowPolicy::DropNewest);
        for i in 1..=4 {
            ch.push(TypeTag::of::<i32>(), Envelope::immutable(i), PushMode::Ordinary)
                .unwrap();
        }
        ch.close(false);
        let (_, a) = ch.extract();
        let (_, b) = ch.extract();
        assert_eq!(a.unwrap().1.downcast_ref::<i32>(), Some(&1));
        assert_eq!(b.unwrap().1.downcast_ref::<i32>(), Some(&2));
        let (status, _) = ch.extract();
        assert_eq!(status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn drop_oldest_keeps_newest_two() {
        let ch = bounded(2, OverflowPolicy::DropOldest);
        for i in 1..=4 {
            ch.push(TypeTag::of::<i32>(), Envelope::immutable(i), PushMode::Ordinary)
                .unwrap();
        }
        let (_, a) = ch.extract();
        let (_, b) = ch.extract();
        assert_eq!(a.unwrap().1.downcast_ref::<i32>(), Some(&3));
        assert_eq!(b.unwrap().1.downcast_ref::<i32>(), Some(&4));
    }

    #[test]
    fn throw_policy_raises_error() {
        let ch = bounded(1, OverflowPolicy::Throw);
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        let result = ch.push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary);
        assert!(matches!(result, Err(ChainError::Overflow { .. })));
    }

    #[test]
    fn close_drop_empties_queue_and_closes() {
        let ch = unbounded();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        ch.close(false);
        assert_eq!(ch.len(), 0);
        let (status, _) = ch.extract();
        assert_eq!(status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn close_retain_lets_queued_messages_drain_first() {
        let ch = unbounded();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary)
            .unwrap();
        ch.close(true);
        let (s1, _) = ch.extract();
        let (s2, _) = ch.extract();
        let (s3, _) = ch.extract();
        assert_eq!(s1, ExtractionStatus::MsgExtracted);
        assert_eq!(s2, ExtractionStatus::MsgExtracted);
        assert_eq!(s3, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn close_is_idempotent() {
        let ch = unbounded();
        ch.close(false);
        ch.close(true); // second call, different argument even - still a no-op
        assert!(ch.is_closed());
        let (status, _) = ch.extract();
        assert_eq!(status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn push_after_close_reports_closed() {
        let ch = unbounded();
        ch.close(false);
        let outcome = ch
            .push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        assert_eq!(outcome, PushOutcome::ChainClosed);
    }

    #[test]
    fn mutable_message_rejected_on_multi_consumer_chain() {
        let ch = Chain::new(ChainParams::unbounded());
        let result = ch.push(
            TypeTag::of::<String>(),
            Envelope::mutable(String::from("x")),
            PushMode::Ordinary,
        );
        assert!(matches!(result, Err(ChainError::MutabilityViolation { .. })));
    }

    #[test]
    fn mutable_message_allowed_on_single_consumer_chain() {
        let ch = Chain::new(ChainParams::unbounded().with_single_consumer(true));
        let result = ch.push(
            TypeTag::of::<String>(),
            Envelope::mutable(String::from("x")),
            PushMode::Ordinary,
        );
        assert!(matches!(result, Ok(PushOutcome::Stored)));
    }

    #[test]
    fn not_empty_notificator_fires_once_per_transition() {
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();
        let params = ChainParams::unbounded()
            .with_not_empty_notificator(Arc::new(move || {
                count2.fetch_add(1, Ordering::SeqCst);
            }));
        let ch = Chain::new(params);
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary)
            .unwrap();
        // Two pushes, but only one empty->nonempty transition.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        ch.extract();
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(3i32), PushMode::Ordinary)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_push_behaves_as_drop_newest_when_waiting_would_block() {
        let ch = bounded(1, OverflowPolicy::Wait(Duration::from_secs(5)));
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        let outcome = ch
            .push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::FromTimer)
            .unwrap();
        assert_eq!(outcome, PushOutcome::NotStored);
    }

    #[test]
    fn try_push_defers_instead_of_blocking_when_full() {
        let ch = bounded(1, OverflowPolicy::Wait(Duration::from_secs(5)));
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        let start = std::time::Instant::now();
        let outcome = ch
            .try_push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary)
            .unwrap();
        assert_eq!(outcome, PushOutcome::Deferred);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn wait_for_space_unblocks_when_consumer_extracts() {
        let ch = Arc::new(bounded(1, OverflowPolicy::Wait(Duration::from_secs(2))));
        ch.push(TypeTag::of::<i32>(), Envelope::immutable(1i32), PushMode::Ordinary)
            .unwrap();
        let producer_chain = ch.clone();
        let handle = std::thread::spawn(move || {
            producer_chain
                .push(TypeTag::of::<i32>(), Envelope::immutable(2i32), PushMode::Ordinary)
                .unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        ch.extract();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome, PushOutcome::Stored);
    }
}
