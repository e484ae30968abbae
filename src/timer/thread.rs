//! Thread-safety mixins layered over a bare [`TimerEngine`]: `SafeEngine`
//! adds locking and the collect/invoke/finish split the concurrency model
//! requires; `TimerThread` adds a dedicated OS thread that sleeps until the
//! nearest fire time and drives `SafeEngine::process_expired` (spec §5, §9:
//! "own OS thread... sleeping on a condvar until the nearest deadline").

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ChainResult;
use crate::sink::{panic_message, ExceptionSink, PanicSource};
use crate::timer::{TimerAction, TimerEngine, TimerEngineConfig, TimerId};

/// Wraps any [`TimerEngine`] behind a mutex and performs the
/// collect-due / invoke-without-lock / finish-exec dance that lets a timer
/// action safely call back into `activate`/`deactivate` on the same engine.
pub struct SafeEngine<E> {
    engine: Mutex<E>,
    exception_sink: Arc<dyn ExceptionSink>,
}

impl<E: TimerEngine> SafeEngine<E> {
    pub fn new(engine: E, exception_sink: Arc<dyn ExceptionSink>) -> Self {
        SafeEngine {
            engine: Mutex::new(engine),
            exception_sink,
        }
    }

    pub fn allocate(&self) -> TimerId {
        self.engine.lock().allocate()
    }

    pub fn activate(&self, id: TimerId, pause: Duration, period: Duration, action: TimerAction) -> ChainResult<()> {
        self.engine.lock().activate(id, pause, period, action)
    }

    pub fn reschedule(&self, id: TimerId, pause: Duration, period: Duration) -> ChainResult<()> {
        self.engine.lock().reschedule(id, pause, period)
    }

    pub fn deactivate(&self, id: TimerId) -> ChainResult<()> {
        self.engine.lock().deactivate(id)
    }

    pub fn status(&self, id: TimerId) -> crate::timer::TimerStatus {
        self.engine.lock().status(id)
    }

    pub fn is_empty(&self) -> bool {
        self.engine.lock().is_empty()
    }

    pub fn nearest_fire_time(&self) -> Option<Instant> {
        self.engine.lock().nearest_fire_time()
    }

    pub fn clear_all(&self) {
        self.engine.lock().clear_all()
    }

    /// Advance to `now`, running every due action with no lock held, and
    /// report any panic to the configured sink (never propagated).
    pub fn process_expired(&self, now: Instant) {
        let due = self.engine.lock().collect_due(now);
        for (id, mut action) in due {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| action())) {
                let msg = panic_message(payload.as_ref());
                self.exception_sink.on_panic(PanicSource::TimerAction, &msg);
            }
            self.engine.lock().finish_exec(id, now);
        }
    }
}

/// Owns a background thread driving a `SafeEngine<E>`. The thread sleeps
/// until the engine's nearest fire time, or until woken early by
/// `notify_schedule_changed` (called after every `activate`/`reschedule`
/// that might have moved the nearest deadline earlier).
pub struct TimerThread<E: TimerEngine + 'static> {
    engine: Arc<SafeEngine<E>>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<E: TimerEngine + 'static> TimerThread<E> {
    pub fn spawn(engine: E, config: &TimerEngineConfig) -> Self {
        let safe = Arc::new(SafeEngine::new(engine, config.exception_sink.clone()));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_engine = safe.clone();
        let worker_wake = wake.clone();
        let worker_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("mchain-timer".to_string())
            .spawn(move || run_loop(worker_engine, worker_wake, worker_shutdown))
            .unwrap_or_else(|e| panic!("failed to spawn timer thread: {e}"));

        TimerThread {
            engine: safe,
            wake,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn engine(&self) -> &Arc<SafeEngine<E>> {
        &self.engine
    }

    /// Wake the background thread immediately so it can re-evaluate the
    /// nearest deadline. Call after scheduling a timer that might fire
    /// sooner than whatever the thread is currently sleeping toward.
    pub fn notify_schedule_changed(&self) {
        let (lock, cv) = &*self.wake;
        *lock.lock() = true;
        cv.notify_one();
    }
}

impl<E: TimerEngine + 'static> Drop for TimerThread<E> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify_schedule_changed();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<E: TimerEngine + 'static>(
    engine: Arc<SafeEngine<E>>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    shutdown: Arc<AtomicBool>,
) {
    let (lock, cv) = &*wake;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        engine.process_expired(Instant::now());

        let sleep_for = match engine.nearest_fire_time() {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::from_secs(60),
        };

        let mut woken = lock.lock();
        if !*woken {
            cv.wait_for(&mut woken, sleep_for);
        }
        *woken = false;
    }
}
