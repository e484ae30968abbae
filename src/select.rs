//! The `select` operation: a multi-chain variant of `receive` supporting
//! both receive-cases (match messages from a chain) and send-cases (attempt
//! to push one prebuilt message into a chain), plus reusable "prepared" and
//! "extensible" selector handles with activation locking (spec §4.4).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::chain::{Chain, ChainId, ExtractionStatus, NotificatorGuard, PushMode, PushOutcome};
use crate::clock::{Clock, Deadline, RemainingTime, SystemClock};
use crate::envelope::{Envelope, TypeTag};
use crate::error::{ChainError, ChainResult};
use crate::handler::{dispatch, BoxHandler};
use crate::sink::{panic_message, ExceptionSink, LoggingExceptionSink, PanicSource};

/// Outcome of a `select` call. Reproduces the original's
/// `mchain_select_result_t` shape exactly: four counters plus derived
/// boolean queries (spec §4.4, SPEC_FULL §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectResult {
    pub extracted: usize,
    pub handled: usize,
    pub sent: usize,
    pub closed: usize,
}

impl SelectResult {
    pub fn was_extracted(&self) -> bool {
        self.extracted != 0
    }
    pub fn was_handled(&self) -> bool {
        self.handled != 0
    }
    pub fn was_sent(&self) -> bool {
        self.sent != 0
    }
    pub fn was_closed(&self) -> bool {
        self.closed != 0
    }
    pub fn is_nothing_happened(&self) -> bool {
        !self.was_extracted() && !self.was_handled() && !self.was_sent()
    }
}

/// Builder over the termination clauses shared by every `select` call. Same
/// shape as `ReceiveParams`'s clauses (spec's `bulk_processing_params_t`
/// base, SPEC_FULL §4): all independently optional and combinable. Select
/// has no `WaitPolicy` of its own — readiness is driven entirely by case
/// notifications; `total_time`/`empty_timeout` bound how long the selector
/// will wait for one.
pub struct SelectParams {
    pub(crate) handle_n: Option<usize>,
    pub(crate) extract_n: Option<usize>,
    pub(crate) empty_timeout: Option<Duration>,
    pub(crate) total_time: Option<Duration>,
    pub(crate) stop_on: Option<Box<dyn FnMut() -> bool + Send>>,
    pub(crate) on_close: Option<Box<dyn FnMut(ChainId) + Send>>,
    pub(crate) exception_sink: Arc<dyn ExceptionSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) no_wait: bool,
}

impl Default for SelectParams {
    fn default() -> Self {
        SelectParams {
            handle_n: None,
            extract_n: None,
            empty_timeout: None,
            total_time: None,
            stop_on: None,
            on_close: None,
            exception_sink: Arc::new(LoggingExceptionSink),
            clock: Arc::new(SystemClock),
            no_wait: false,
        }
    }
}

/// Entry point mirroring `so_5::from_all()` for `select` — an empty clause
/// set that waits forever for at least one handled or sent message.
pub fn from_all() -> SelectParams {
    SelectParams::default()
}

impl SelectParams {
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

    /// Perform exactly one non-blocking pass over every case's current
    /// readiness and return, instead of waiting for something to happen.
    /// Mirrors `receive`'s `WaitPolicy::NoWait` (which extracts whatever is
    /// already available before reporting `WouldBlock`), rather than forcing
    /// the deadline to expire before the first scan runs.
    pub fn no_wait_on_empty(mut self) -> Self {
        self.no_wait = true;
        self
    }

    pub fn stop_on(mut self, pred: impl FnMut() -> bool + Send + 'static) -> Self {
        self.stop_on = Some(Box::new(pred));
        self
    }

    pub fn on_close(mut self, cb: impl FnMut(ChainId) + Send + 'static) -> Self {
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

/// One participant in a `select` call: either a receive-case (matches
/// messages from a chain through a handler bundle) or a send-case (attempts
/// to push one prebuilt message).
pub enum SelectCase {
    Receive {
        chain: Chain,
        handlers: Vec<BoxHandler>,
    },
    Send {
        chain: Chain,
        tag: TypeTag,
        /// Called at most once per `select()` invocation to build the
        /// envelope to push; re-used across retries within that call if the
        /// first attempt is deferred.
        build: Box<dyn FnMut() -> Envelope + Send>,
        mode: PushMode,
        on_success: Box<dyn FnMut() + Send>,
    },
}

impl SelectCase {
    pub fn receive(chain: Chain, handlers: Vec<BoxHandler>) -> Self {
        SelectCase::Receive { chain, handlers }
    }

    /// Build a send-case that pushes a fresh `T` (via `build`) on every
    /// `select()` call, reporting success through `on_success`.
    pub fn send<T, B, S>(chain: Chain, mut build: B, mut on_success: S) -> Self
    where
        T: Send + Sync + 'static,
        B: FnMut() -> T + Send + 'static,
        S: FnMut() + Send + 'static,
    {
        SelectCase::Send {
            chain,
            tag: TypeTag::of::<T>(),
            build: Box::new(move || Envelope::immutable(build())),
            mode: PushMode::Ordinary,
            on_success: Box::new(move || on_success()),
        }
    }

    fn chain(&self) -> &Chain {
        match self {
            SelectCase::Receive { chain, .. } => chain,
            SelectCase::Send { chain, .. } => chain,
        }
    }
}

/// Selector-local wake primitive: tracks which case indices have a pending
/// readiness signal. Its mutex is always acquired *before* any chain mutex
/// (lock order selector -> chain, spec §5), which is automatically
/// respected here since the only chain operations called while holding it
/// are none — this struct only ever locks itself.
struct Notificator {
    signalled: Mutex<Vec<bool>>,
    condvar: Condvar,
}

impl Notificator {
    fn new(case_count: usize) -> Self {
        Notificator {
            // Every case starts ready: "register every case as
            // initially-ready (so the first pass scans all chains)".
            signalled: Mutex::new(vec![true; case_count]),
            condvar: Condvar::new(),
        }
    }

    fn mark(&self, index: usize) {
        let mut guard = self.signalled.lock();
        if let Some(slot) = guard.get_mut(index) {
            *slot = true;
        }
        drop(guard);
        self.condvar.notify_all();
    }

    /// Drain every currently-signalled index, blocking up to `timeout`
    /// (`None` = no deadline) if none are signalled yet.
    fn wait_and_drain(&self, timeout: Option<Duration>) -> Vec<usize> {
        let mut guard = self.signalled.lock();
        if !guard.iter().any(|&s| s) {
            match timeout {
                None => {
                    while !guard.iter().any(|&s| s) {
                        self.condvar.wait(&mut guard);
                    }
                }
                Some(d) => {
                    let deadline = Instant::now() + d;
                    while !guard.iter().any(|&s| s) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let timed_out = self.condvar.wait_for(&mut guard, deadline - now).timed_out();
                        if timed_out {
                            break;
                        }
                    }
                }
            }
        }
        let drained: Vec<usize> = guard
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| s.then_some(i))
            .collect();
        for i in &drained {
            guard[*i] = false;
        }
        drained
    }
}

/// Shared termination bookkeeping, identical in spirit to
/// `receive::TerminationState` (spec: select reuses the same clauses).
struct TerminationState {
    total_deadline: Deadline,
    empty_since: Option<Instant>,
}

impl TerminationState {
    fn new(clock: &dyn Clock, total_time: Option<Duration>) -> Self {
        let remaining = total_time.map(RemainingTime::Finite).unwrap_or(RemainingTime::Infinite);
        TerminationState {
            total_deadline: Deadline::from_remaining(clock, remaining),
            empty_since: None,
        }
    }

    fn note_activity(&mut self) {
        self.empty_since = None;
    }

    fn note_quiet(&mut self, clock: &dyn Clock) {
        if self.empty_since.is_none() {
            self.empty_since = Some(clock.now());
        }
    }

    fn empty_timeout_remaining(&self, clock: &dyn Clock, empty_timeout: Option<Duration>) -> RemainingTime {
        match (empty_timeout, self.empty_since) {
            (Some(d), Some(since)) => {
                let elapsed = clock.now().saturating_duration_since(since);
                RemainingTime::Finite(d.saturating_sub(elapsed))
            }
            _ => RemainingTime::Infinite,
        }
    }
}

/// Run one `select` call over `cases`, consuming `params`'s one-shot clauses
/// (`stop_on`/`on_close` are `FnMut` and keep their state across repeated
/// calls when reused through a prepared/extensible selector).
fn run_select(params: &mut SelectParams, cases: &mut [SelectCase]) -> SelectResult {
    let clock = params.clock.clone();
    let mut term = TerminationState::new(clock.as_ref(), params.total_time);
    let mut result = SelectResult::default();

    if cases.is_empty() {
        return result;
    }

    let notificator = Arc::new(Notificator::new(cases.len()));
    let _guards: Vec<NotificatorGuard> = cases
        .iter()
        .enumerate()
        .map(|(index, case)| {
            let notificator = notificator.clone();
            case.chain().register_not_empty(Arc::new(move || notificator.mark(index)))
        })
        .collect();

    let mut done = vec![false; cases.len()];
    // Cases whose chain is bounded-with-wait and whose last attempt was
    // deferred: re-tried on every wake regardless of which chain signalled,
    // since nothing notifies this selector when space frees up on the
    // destination chain (spec §9 open question: the "deferred" push status
    // is promoted to a first-class part of the send-case contract for
    // exactly this reason).
    let mut deferred: Vec<bool> = vec![false; cases.len()];
    // Set once the single non-blocking pass `no_wait` promises has run, so
    // the next trip through the loop returns instead of scanning again.
    let mut no_wait_pass_done = false;

    loop {
        if let Some(n) = params.handle_n {
            if result.handled >= n {
                return result;
            }
        }
        if let Some(n) = params.extract_n {
            if result.extracted >= n {
                return result;
            }
        }
        if let Some(pred) = params.stop_on.as_mut() {
            match catch_unwind(AssertUnwindSafe(|| pred())) {
                Ok(true) => return result,
                Ok(false) => {}
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    params.exception_sink.on_panic(PanicSource::StopPredicate, &msg);
                    return result;
                }
            }
        }
        if result.closed == cases.len() {
            return result;
        }
        if term.total_deadline.is_expired(clock.as_ref()) {
            return result;
        }
        if params.no_wait && no_wait_pass_done {
            return result;
        }

        let wait_timeout = if params.no_wait {
            Some(Duration::ZERO)
        } else {
            let empty_remaining = term.empty_timeout_remaining(clock.as_ref(), params.empty_timeout);
            let total_remaining = term.total_deadline.remaining(clock.as_ref());
            let bounded = empty_remaining.min(total_remaining);
            if bounded.is_exhausted() {
                return result;
            }
            bounded.as_wait_duration()
        };

        let mut signalled = notificator.wait_and_drain(wait_timeout);
        for (index, is_deferred) in deferred.iter().enumerate() {
            if *is_deferred && !signalled.contains(&index) {
                signalled.push(index);
            }
        }

        if signalled.is_empty() {
            if params.no_wait {
                return result;
            }
            // Woke on timeout with nothing to do.
            term.note_quiet(clock.as_ref());
            if term.total_deadline.is_expired(clock.as_ref()) {
                return result;
            }
            if term
                .empty_timeout_remaining(clock.as_ref(), params.empty_timeout)
                .is_exhausted()
            {
                return result;
            }
            continue;
        }

        let mut progressed = false;
        for index in signalled {
            if done[index] {
                continue;
            }
            match &mut cases[index] {
                SelectCase::Receive { chain, handlers } => {
                    progressed |= drain_receive_case(
                        chain,
                        handlers,
                        index,
                        &mut result,
                        &mut done,
                        &mut term,
                        params,
                        clock.as_ref(),
                    );
                }
                SelectCase::Send {
                    chain,
                    tag,
                    build,
                    mode,
                    on_success,
                } => {
                    let outcome = try_send_case(chain, *tag, build.as_mut(), *mode);
                    match outcome {
                        Ok(PushOutcome::Stored) => {
                            deferred[index] = false;
                            result.sent += 1;
                            on_success();
                            term.note_activity();
                            return result; // a successful send always terminates select.
                        }
                        Ok(PushOutcome::Deferred) => {
                            deferred[index] = true;
                        }
                        Ok(PushOutcome::NotStored) => {
                            deferred[index] = false;
                        }
                        Ok(PushOutcome::ChainClosed) => {
                            deferred[index] = false;
                            if !done[index] {
                                done[index] = true;
                                result.closed += 1;
                                if let Some(cb) = params.on_close.as_mut() {
                                    cb(chain.id());
                                }
                            }
                        }
                        Err(_) => {
                            deferred[index] = false;
                        }
                    }
                }
            }
        }
        if progressed {
            term.note_activity();
        }
        if params.no_wait {
            no_wait_pass_done = true;
        }
    }
}

/// Drain every currently-available message on a signalled receive-case's
/// chain, since the not-empty notificator coalesces multiple pushes into
/// one wake-up (spec §4.2). Returns `true` if anything was extracted.
#[allow(clippy::too_many_arguments)]
fn drain_receive_case(
    chain: &Chain,
    handlers: &mut [BoxHandler],
    index: usize,
    result: &mut SelectResult,
    done: &mut [bool],
    term: &mut TerminationState,
    params: &mut SelectParams,
    clock: &dyn Clock,
) -> bool {
    let mut progressed = false;
    loop {
        if let Some(n) = params.handle_n {
            if result.handled >= n {
                return progressed;
            }
        }
        if let Some(n) = params.extract_n {
            if result.extracted >= n {
                return progressed;
            }
        }
        let (status, item) = chain.extract();
        match status {
            ExtractionStatus::MsgExtracted => {
                progressed = true;
                result.extracted += 1;
                term.note_activity();
                let Some((tag, envelope)) = item else {
                    unreachable!("MsgExtracted always carries an item");
                };
                match catch_unwind(AssertUnwindSafe(|| dispatch(handlers, tag, &envelope))) {
                    Ok(true) => result.handled += 1,
                    Ok(false) => {}
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        params.exception_sink.on_panic(PanicSource::Handler, &msg);
                        result.handled += 1;
                    }
                }
            }
            ExtractionStatus::NoMessages => {
                return progressed;
            }
            ExtractionStatus::ChainClosed => {
                if !done[index] {
                    done[index] = true;
                    result.closed += 1;
                    if let Some(cb) = params.on_close.as_mut() {
                        cb(chain.id());
                    }
                }
                return progressed;
            }
        }
    }
}

fn try_send_case(
    chain: &Chain,
    tag: TypeTag,
    build: &mut (dyn FnMut() -> Envelope + Send),
    mode: PushMode,
) -> ChainResult<PushOutcome> {
    chain.try_push(tag, build(), mode)
}

/// Select once over `cases` under `params`. See module docs and spec §4.4.
pub fn select(mut params: SelectParams, mut cases: Vec<SelectCase>) -> SelectResult {
    run_select(&mut params, &mut cases)
}

/// Whether a prepared/extensible selector is currently being driven by a
/// thread. Guards against concurrent or nested activation (spec §4.4:
/// "A mutex-guarded status word forbids concurrent or nested activation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Passive,
    Active,
}

/// An immutable, reusable `select` configuration: parameters plus a fixed
/// case vector. `select(&prepared)` may be called repeatedly, but never
/// concurrently from two threads (spec §4.4).
pub struct PreparedSelect {
    params: Mutex<SelectParams>,
    cases: Mutex<Vec<SelectCase>>,
    status: Mutex<Status>,
}

impl PreparedSelect {
    pub fn new(params: SelectParams, cases: Vec<SelectCase>) -> Self {
        PreparedSelect {
            params: Mutex::new(params),
            cases: Mutex::new(cases),
            status: Mutex::new(Status::Passive),
        }
    }

    fn activate(&self) -> ChainResult<()> {
        let mut status = self.status.lock();
        if *status == Status::Active {
            return Err(ChainError::AlreadyActive);
        }
        *status = Status::Active;
        Ok(())
    }

    fn deactivate(&self) {
        *self.status.lock() = Status::Passive;
    }
}

/// Drive a prepared selector once. Fails with `ChainError::AlreadyActive` if
/// another thread is already inside a call on the same selector.
pub fn select_prepared(prepared: &PreparedSelect) -> ChainResult<SelectResult> {
    prepared.activate()?;
    struct ActiveGuard<'a>(&'a PreparedSelect);
    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.deactivate();
        }
    }
    let _guard = ActiveGuard(prepared);

    let mut params = prepared.params.lock();
    let mut cases = prepared.cases.lock();
    Ok(run_select(&mut params, &mut cases))
}

/// A [`PreparedSelect`] whose case list may be mutated with [`add_cases`]
/// while passive; mutation while active is rejected (spec §4.4).
pub struct ExtensibleSelect {
    inner: PreparedSelect,
}

impl ExtensibleSelect {
    pub fn new(params: SelectParams) -> Self {
        ExtensibleSelect {
            inner: PreparedSelect::new(params, Vec::new()),
        }
    }

    pub fn select(&self) -> ChainResult<SelectResult> {
        select_prepared(&self.inner)
    }
}

/// Append `new_cases` to an extensible selector's case list. Fails with
/// `ChainError::ExtensibleSelectModifyActive` if the selector is currently
/// being driven by `select()` on another thread.
pub fn add_cases(selector: &ExtensibleSelect, new_cases: impl IntoIterator<Item = SelectCase>) -> ChainResult<()> {
    let status = selector.inner.status.lock();
    if *status == Status::Active {
        return Err(ChainError::ExtensibleSelectModifyActive);
    }
    drop(status);
    selector.inner.cases.lock().extend(new_cases);
    Ok(())
}
