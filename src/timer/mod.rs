//! The timer engine: three interchangeable scheduling data structures behind
//! one trait (spec §4.5). None of them assume an async runtime — a timer
//! only "fires" when something calls [`TimerEngine::collect_due`], which the
//! `thread` mixin below does from a dedicated OS thread.

pub mod heap;
pub mod list;
pub mod thread;
pub mod wheel;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ChainError, ChainResult};
use crate::sink::{LoggingExceptionSink, ExceptionSink};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to a single schedulable timer slot, stable across
/// `reschedule`/`deactivate`/`activate` cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Lifecycle state of one timer (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Allocated, never activated, or deactivated and fully settled.
    Inactive,
    /// Waiting to fire.
    Active,
    /// Its action is currently running (the engine is between
    /// `collect_due` and `finish_exec` for this id).
    PendingExec,
    /// `deactivate` was called while the action was running; it will settle
    /// to `Inactive` instead of re-arming once the action returns.
    PendingDeactivation,
}

/// A timer's action. Boxed and type-erased: the engine never knows what a
/// timer does, only when to run it.
pub type TimerAction = Box<dyn FnMut() + Send>;

/// Construction parameters shared by all three concrete engines. Only the
/// fields a given engine actually needs are read; the rest are ignored
/// (e.g. `heap_initial_capacity` is meaningless to a wheel engine).
///
/// Defaults are taken from the reference timer engine this design is
/// grounded on: wheel size 1000, granularity 10ms, heap initial capacity 64.
#[derive(Clone)]
pub struct TimerEngineConfig {
    pub granularity: Duration,
    pub wheel_size: usize,
    pub heap_initial_capacity: usize,
    pub exception_sink: Arc<dyn ExceptionSink>,
}

impl fmt::Debug for TimerEngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEngineConfig")
            .field("granularity", &self.granularity)
            .field("wheel_size", &self.wheel_size)
            .field("heap_initial_capacity", &self.heap_initial_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for TimerEngineConfig {
    fn default() -> Self {
        TimerEngineConfig {
            granularity: Duration::from_millis(10),
            wheel_size: 1000,
            heap_initial_capacity: 64,
            exception_sink: Arc::new(LoggingExceptionSink),
        }
    }
}

/// A schedulable timer: one delayed or periodic action under one of the
/// three concrete storage disciplines below. Methods that mutate scheduling
/// state take `&mut self` — callers needing shared access use
/// [`thread::SafeEngine`], which adds the locking and the
/// collect/invoke/finish split the concurrency model requires (spec §5:
/// "the engine's own lock is held only while mutating scheduling
/// structures, and is released before a user action runs").
pub trait TimerEngine: Send {
    /// Reserve a new, initially `Inactive` timer slot.
    fn allocate(&mut self) -> TimerId;

    /// Arm `id` to fire after `pause`, and then every `period` after that
    /// (`period == Duration::ZERO` means one-shot). Fails with
    /// `TimerNotDeactivated` unless `id` is currently `Inactive`.
    fn activate(&mut self, id: TimerId, pause: Duration, period: Duration, action: TimerAction) -> ChainResult<()>;

    /// Atomically deactivate then reactivate `id` with new timing, keeping
    /// its existing action. Fails with `TimerInProcessing` if `id` is
    /// `PendingExec`/`PendingDeactivation` (spec's resolved open question:
    /// on failure the timer is left deactivated, the prior schedule is not
    /// restored).
    fn reschedule(&mut self, id: TimerId, pause: Duration, period: Duration) -> ChainResult<()>;

    /// Stop `id`. If it is currently executing, marks it
    /// `PendingDeactivation` instead of removing it immediately so a
    /// concurrently-running periodic action does not get re-armed.
    fn deactivate(&mut self, id: TimerId) -> ChainResult<()>;

    fn status(&self, id: TimerId) -> TimerStatus;

    /// `true` if no timer is `Active`, `PendingExec`, or
    /// `PendingDeactivation`.
    fn is_empty(&self) -> bool;

    /// Absolute time of the earliest `Active` timer, if any. Used by the
    /// background thread to size its next sleep.
    fn nearest_fire_time(&self) -> Option<Instant>;

    /// Deactivate every timer, dropping their actions.
    fn clear_all(&mut self);

    /// Advance scheduling state to `now`, returning every timer now due
    /// along with its action, and marking each `PendingExec`. The caller
    /// must run each action without holding any lock this engine is behind,
    /// then call [`TimerEngine::finish_exec`] for that id.
    fn collect_due(&mut self, now: Instant) -> Vec<(TimerId, TimerAction)>;

    /// Settle `id` after its action has run. Re-arms it if it is periodic
    /// and still `PendingExec` (i.e. no concurrent `deactivate` landed
    /// while the action was running); otherwise leaves it `Inactive`.
    fn finish_exec(&mut self, id: TimerId, now: Instant);
}

pub(crate) fn ticks_for(granularity: Duration, pause: Duration) -> u64 {
    let g = granularity.as_nanos().max(1);
    let half = g / 2;
    let ticks = (pause.as_nanos() + half) / g;
    ticks.max(1) as u64
}

pub(crate) fn not_deactivated_err() -> ChainError {
    ChainError::TimerNotDeactivated
}

pub(crate) fn in_processing_err() -> ChainError {
    ChainError::TimerInProcessing
}
