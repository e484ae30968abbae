//! The `receive` operation: a blocking/timed multi-handler extractor over
//! one chain with composable termination clauses.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain::{Chain, ExtractionStatus};
use crate::clock::{Clock, Deadline, RemainingTime, SystemClock};
use crate::handler::{dispatch, BoxHandler};
use crate::sink::{panic_message, ExceptionSink, LoggingExceptionSink, PanicSource};

/// The empty-queue wait policy (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub enum WaitPolicy {
    /// Never block; if the chain is empty, return immediately.
    NoWait,
    /// Block with no deadline until a message arrives or the chain closes.
    InfiniteWait,
    /// Block up to `Duration` per empty-queue encounter.
    Wait(Duration),
}

/// Why a `receive` (or, via the shared base, a `select`) call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `handle_n(k)` was reached.
    HandleLimitReached,
    /// `extract_n(k)` was reached.
    ExtractLimitReached,
    /// `empty_timeout(d)` elapsed with the queue continuously empty.
    EmptyTimeoutExpired,
    /// `total_time(d)` elapsed.
    TotalTimeExpired,
    /// `stop_on(pred)` returned `true` (or panicked — a panicking predicate
    /// always aborts the call, spec §4.3).
    StopPredicate,
    /// The chain was closed and is now empty (or both chains, for select,
    /// are closed).
    ChainClosed,
    /// The empty-queue wait policy's own timeout/no-wait elapsed without
    /// any other clause firing.
    WouldBlock,
    /// An exception sink asked the loop to stop after a handler panic.
    HandlerRequestedStop,
}

/// Outcome of a `receive` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveResult {
    pub extracted: usize,
    pub handled: usize,
    pub status: StopReason,
}

/// Builder over one chain's termination clauses. Every clause is optional
/// and independently combinable (termination is any-of).
pub struct ReceiveParams {
    pub(crate) wait: WaitPolicy,
    pub(crate) handle_n: Option<usize>,
    pub(crate) extract_n: Option<usize>,
    pub(crate) empty_timeout: Option<Duration>,
    pub(crate) total_time: Option<Duration>,
    pub(crate) stop_on: Option<Box<dyn FnMut() -> bool + Send>>,
    pub(crate) on_close: Option<Box<dyn FnMut() + Send>>,
    pub(crate) exception_sink: Arc<dyn ExceptionSink>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Default for ReceiveParams {
    fn default() -> Self {
        ReceiveParams {
            wait: WaitPolicy::InfiniteWait,
            handle_n: None,
            extract_n: None,
            empty_timeout: None,
            total_time: None,
            stop_on: None,
            on_close: None,
            exception_sink: Arc::new(LoggingExceptionSink),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Entry point mirroring `so_5::from_all()` — an empty clause set that
/// waits forever for at least one handled message.
pub fn from_all() -> ReceiveParams {
    ReceiveParams::default()
}

impl ReceiveParams {
    pub fn no_wait(mut self) -> Self {
        self.wait = WaitPolicy::NoWait;
        self
    }

    pub fn infinite_wait(mut self) -> Self {
        self.wait = WaitPolicy::InfiniteWait;
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.wait = WaitPolicy::Wait(duration);
        self
    }

    pub fn handle_n(mut self, k: usize) -> Self {
        self.handle_n = Some(k);
        self
    }

    pub fn handle_all(mut self) -> Self {
        self.handle_n = None;
        self
    }

    pub fn extract_n(mut self, k: usize) -> Self {
        self.extract_n = Some(k);
        self
    }

    pub fn empty_timeout(mut self, duration: Duration) -> Self {
        self.empty_timeout = Some(duration);
        self
    }

    pub fn total_time(mut self, duration: Duration) -> Self {
        self.total_time = Some(duration);
        self
    }

    pub fn stop_on(mut self, pred: impl FnMut() -> bool + Send + 'static) -> Self {
        self.stop_on = Some(Box::new(pred));
        self
    }

    pub fn on_close(mut self, cb: impl FnMut() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(cb));
        self
    }

    pub fn with_exception_sink(mut self, sink: Arc<dyn ExceptionSink>) -> Self {
        self.exception_sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Shared loop-control state threaded through `receive` (and reused, in
/// spirit, by `select` for its identical termination bookkeeping).
pub(crate) struct TerminationState {
    pub(crate) total_deadline: Deadline,
    pub(crate) empty_since: Option<Instant>,
}

impl TerminationState {
    pub(crate) fn new(clock: &dyn Clock, total_time: Option<Duration>) -> Self {
        let remaining = total_time
            .map(RemainingTime::Finite)
            .unwrap_or(RemainingTime::Infinite);
        TerminationState {
            total_deadline: Deadline::from_remaining(clock, remaining),
            empty_since: None,
        }
    }

    pub(crate) fn note_extracted(&mut self) {
        self.empty_since = None;
    }

    pub(crate) fn note_empty(&mut self, clock: &dyn Clock) {
        if self.empty_since.is_none() {
            self.empty_since = Some(clock.now());
        }
    }

    pub(crate) fn empty_timeout_remaining(
        &self,
        clock: &dyn Clock,
        empty_timeout: Option<Duration>,
    ) -> RemainingTime {
        match (empty_timeout, self.empty_since) {
            (Some(d), Some(since)) => {
                let elapsed = clock.now().saturating_duration_since(since);
                RemainingTime::Finite(d.saturating_sub(elapsed))
            }
            _ => RemainingTime::Infinite,
        }
    }
}

/// Run `receive` over `chain` with `params`, dispatching extracted messages
/// through `handlers`.
pub fn receive(chain: &Chain, mut params: ReceiveParams, mut handlers: Vec<BoxHandler>) -> ReceiveResult {
    let clock = params.clock.clone();
    let mut term = TerminationState::new(clock.as_ref(), params.total_time);
    let mut extracted = 0usize;
    let mut handled = 0usize;

    loop {
        if let Some(n) = params.handle_n {
            if handled >= n {
                return ReceiveResult { extracted, handled, status: StopReason::HandleLimitReached };
            }
        }
        if let Some(n) = params.extract_n {
            if extracted >= n {
                return ReceiveResult { extracted, handled, status: StopReason::ExtractLimitReached };
            }
        }
        if let Some(pred) = params.stop_on.as_mut() {
            match catch_unwind(AssertUnwindSafe(|| pred())) {
                Ok(true) => {
                    return ReceiveResult { extracted, handled, status: StopReason::StopPredicate };
                }
                Ok(false) => {}
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    params.exception_sink.on_panic(PanicSource::StopPredicate, &msg);
                    return ReceiveResult { extracted, handled, status: StopReason::StopPredicate };
                }
            }
        }
        if term.total_deadline.is_expired(clock.as_ref()) {
            return ReceiveResult { extracted, handled, status: StopReason::TotalTimeExpired };
        }

        let (status, item) = chain.extract();
        match status {
            ExtractionStatus::MsgExtracted => {
                extracted += 1;
                term.note_extracted();
                let Some((tag, envelope)) = item else {
                    unreachable!("MsgExtracted always carries an item");
                };
                match catch_unwind(AssertUnwindSafe(|| dispatch(&mut handlers, tag, &envelope))) {
                    Ok(true) => handled += 1,
                    Ok(false) => {}
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        let stop = params.exception_sink.on_panic(PanicSource::Handler, &msg);
                        handled += 1; // the message is considered consumed regardless
                        if stop {
                            return ReceiveResult {
                                extracted,
                                handled,
                                status: StopReason::HandlerRequestedStop,
                            };
                        }
                    }
                }
            }
            ExtractionStatus::ChainClosed => {
                if let Some(cb) = params.on_close.as_mut() {
                    cb();
                }
                return ReceiveResult { extracted, handled, status: StopReason::ChainClosed };
            }
            ExtractionStatus::NoMessages => {
                term.note_empty(clock.as_ref());
                let wait_cap = match params.wait {
                    WaitPolicy::NoWait => {
                        return ReceiveResult { extracted, handled, status: StopReason::WouldBlock };
                    }
                    WaitPolicy::InfiniteWait => RemainingTime::Infinite,
                    WaitPolicy::Wait(d) => RemainingTime::Finite(d),
                };
                let empty_remaining = term.empty_timeout_remaining(clock.as_ref(), params.empty_timeout);
                let total_remaining = term.total_deadline.remaining(clock.as_ref());
                let bounded = wait_cap.min(empty_remaining).min(total_remaining);

                if bounded.is_exhausted() {
                    if term.total_deadline.is_expired(clock.as_ref()) {
                        return ReceiveResult { extracted, handled, status: StopReason::TotalTimeExpired };
                    }
                    if empty_remaining.is_exhausted() {
                        return ReceiveResult { extracted, handled, status: StopReason::EmptyTimeoutExpired };
                    }
                    return ReceiveResult { extracted, handled, status: StopReason::WouldBlock };
                }

                let woke = chain.wait_not_empty_or_closed(bounded.as_wait_duration());
                if !woke {
                    if term.total_deadline.is_expired(clock.as_ref()) {
                        return ReceiveResult { extracted, handled, status: StopReason::TotalTimeExpired };
                    }
                    if term
                        .empty_timeout_remaining(clock.as_ref(), params.empty_timeout)
                        .is_exhausted()
                    {
                        return ReceiveResult { extracted, handled, status: StopReason::EmptyTimeoutExpired };
                    }
                    return ReceiveResult { extracted, handled, status: StopReason::WouldBlock };
                }
                // else: woke up because of a message or close; loop back to extract.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainParams, PushMode};
    use crate::envelope::{Envelope, TypeTag};
    use crate::handler::on;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    struct HelloSignal;

    #[test]
    fn simple_enqueue_dequeue() {
        let chain = Chain::new(ChainParams::unbounded());
        chain
            .push(TypeTag::of::<i32>(), Envelope::immutable(42i32), PushMode::Ordinary)
            .unwrap();
        chain
            .push(TypeTag::of::<HelloSignal>(), Envelope::immutable(HelloSignal), PushMode::Ordinary)
            .unwrap();

        let int_seen = Arc::new(AtomicI32::new(0));
        let int_seen2 = int_seen.clone();
        let hello_seen = Arc::new(AtomicBool::new(false));
        let hello_seen2 = hello_seen.clone();

        let result = receive(
            &chain,
            from_all().handle_n(1),
            vec![
                on::<i32, _>(move |m| int_seen2.store(*m.get(), Ordering::SeqCst)),
                on::<HelloSignal, _>(move |_m| hello_seen2.store(true, Ordering::SeqCst)),
            ],
        );

        assert_eq!(result.extracted, 1);
        assert_eq!(result.handled, 1);
        assert_eq!(int_seen.load(Ordering::SeqCst), 42);
        assert!(!hello_seen.load(Ordering::SeqCst));
    }

    #[test]
    fn handle_n_zero_returns_immediately() {
        let chain = Chain::new(ChainParams::unbounded());
        let result = receive(&chain, from_all().handle_n(0), vec![]);
        assert_eq!(result.extracted, 0);
        assert_eq!(result.handled, 0);
        assert_eq!(result.status, StopReason::HandleLimitReached);
    }

    #[test]
    fn no_wait_on_empty_returns_would_block() {
        let chain = Chain::new(ChainParams::unbounded());
        let result = receive(&chain, from_all().no_wait(), vec![]);
        assert_eq!(result.status, StopReason::WouldBlock);
    }

    #[test]
    fn closed_chain_reports_chain_closed_and_invokes_handler() {
        let chain = Chain::new(ChainParams::unbounded());
        chain.close(false);
        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = closed.clone();
        let result = receive(&chain, from_all().on_close(move || closed2.store(true, Ordering::SeqCst)), vec![]);
        assert_eq!(result.status, StopReason::ChainClosed);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn unmatched_message_counts_as_extracted_not_handled() {
        let chain = Chain::new(ChainParams::unbounded());
        chain
            .push(TypeTag::of::<HelloSignal>(), Envelope::immutable(HelloSignal), PushMode::Ordinary)
            .unwrap();
        let result = receive(&chain, from_all().extract_n(1), vec![on::<i32, _>(|_| {})]);
        assert_eq!(result.extracted, 1);
        assert_eq!(result.handled, 0);
    }

    #[test]
    fn empty_timeout_terminates_while_chain_stays_open() {
        let chain = Chain::new(ChainParams::unbounded());
        let result = receive(
            &chain,
            from_all()
                .wait(Duration::from_secs(5))
                .empty_timeout(Duration::from_millis(30)),
            vec![],
        );
        assert_eq!(result.status, StopReason::EmptyTimeoutExpired);
        assert!(!chain.is_closed());
    }

    #[test]
    fn message_pushed_from_another_thread_wakes_blocking_receive() {
        let chain = Chain::new(ChainParams::unbounded());
        let producer = chain.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer
                .push(TypeTag::of::<i32>(), Envelope::immutable(5i32), PushMode::Ordinary)
                .unwrap();
        });
        let result = receive(&chain, from_all().wait(Duration::from_secs(2)).handle_n(1), vec![on::<i32, _>(|_| {})]);
        handle.join().unwrap();
        assert_eq!(result.status, StopReason::HandleLimitReached);
        assert_eq!(result.handled, 1);
    }
}
