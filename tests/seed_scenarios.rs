//! The six concrete seed scenarios from the spec's testable-properties
//! section, each as one integration test. See `DESIGN.md` for the mapping
//! from scenario number to test name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mchain::chain::{ChainParams, OverflowPolicy, Storage};
use mchain::environment::{Environment, LocalEnvironment};
use mchain::handler::on;
use mchain::receive::{from_all as receive_from_all, receive};
use mchain::select::{from_all as select_from_all, select, select_prepared, PreparedSelect, SelectCase};
use mchain::send::{send, send_delayed};
use mchain::timer::list::ListEngine;
use mchain::timer::thread::SafeEngine;
use mchain::timer::TimerEngineConfig;
use mchain::ChainError;

struct HelloSignal;

/// Scenario 1: simple enqueue/dequeue on one unbounded chain.
#[test]
fn scenario_1_simple_enqueue_dequeue() {
    let env = LocalEnvironment::new();
    let chain = env.create_chain(ChainParams::unbounded());

    send(&chain, 42i32).unwrap();
    send(&chain, HelloSignal).unwrap();

    let int_seen = Arc::new(std::sync::atomic::AtomicI32::new(0));
    let int_seen2 = int_seen.clone();
    let hello_seen = Arc::new(AtomicBool::new(false));
    let hello_seen2 = hello_seen.clone();

    let result = receive(
        &chain,
        receive_from_all().no_wait(),
        vec![
            on::<i32, _>(move |m| int_seen2.store(*m.get(), Ordering::SeqCst)),
            on::<HelloSignal, _>(move |_| hello_seen2.store(true, Ordering::SeqCst)),
        ],
    );

    assert_eq!(result.extracted, 1);
    assert_eq!(result.handled, 1);
    assert_eq!(int_seen.load(Ordering::SeqCst), 42);
    assert!(!hello_seen.load(Ordering::SeqCst));
}

/// Scenario 2: bounded chain, capacity 2, drop-newest overflow. Producer
/// sends 1,2,3,4 then closes; consumer drains 1,2 then sees `chain_closed`.
#[test]
fn scenario_2_overflow_drop_newest() {
    let env = LocalEnvironment::new();
    let chain = env.create_chain(
        ChainParams::bounded(2, Storage::Dynamic).with_overflow(OverflowPolicy::DropNewest),
    );

    for i in 1..=4 {
        send(&chain, i).unwrap();
    }
    chain.close(false);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let result = receive(
        &chain,
        receive_from_all().extract_n(10),
        vec![on::<i32, _>(move |m| seen2.lock().unwrap().push(*m.get()))],
    );

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(result.extracted, 2);
}

/// Scenario 3: a timer fires a delayed send into a chain; the consumer must
/// not see the message before the configured delay elapses.
#[test]
fn scenario_3_timer_fires_into_chain() {
    let env = LocalEnvironment::new();
    let chain = env.create_chain(ChainParams::unbounded());
    let config = TimerEngineConfig::default();
    let engine = SafeEngine::new(ListEngine::new(config.clone()), env.exception_sink());

    let start = Instant::now();
    send_delayed::<i32, _>(&chain, &engine, Duration::from_millis(100), 7).unwrap();

    let driver_chain = chain.clone();
    let handle = thread::spawn(move || loop {
        engine.process_expired(Instant::now());
        if !driver_chain.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    });

    let result = receive(&chain, receive_from_all().infinite_wait().handle_n(1), vec![on::<i32, _>(|_| {})]);
    handle.join().unwrap();

    assert_eq!(result.handled, 1);
    assert!(start.elapsed() >= Duration::from_millis(95));
}

/// Scenario 4: select across three chains, only one has a message.
#[test]
fn scenario_4_select_with_three_chains() {
    let env = LocalEnvironment::new();
    let ch1 = env.create_chain(ChainParams::unbounded());
    let ch2 = env.create_chain(ChainParams::unbounded());
    let ch3 = env.create_chain(ChainParams::unbounded());

    send(&ch2, HelloSignal).unwrap();

    let flag = Arc::new(AtomicBool::new(false));
    let flag2 = flag.clone();
    let result = select(
        select_from_all().handle_n(1),
        vec![
            SelectCase::receive(ch1, vec![on::<i32, _>(|_| panic!("ch1 must not fire"))]),
            SelectCase::receive(
                ch2,
                vec![on::<HelloSignal, _>(move |_| flag2.store(true, Ordering::SeqCst))],
            ),
            SelectCase::receive(ch3, vec![on::<i32, _>(|_| panic!("ch3 must not fire"))]),
        ],
    );

    assert_eq!(result.extracted, 1);
    assert_eq!(result.handled, 1);
    assert!(flag.load(Ordering::SeqCst));
}

/// Scenario 5: a prepared selector rejects concurrent reactivation; closing
/// the watched chain unblocks the first caller and clears the status.
#[test]
fn scenario_5_prepared_select_reuse_rejection() {
    let env = LocalEnvironment::new();
    let chain = env.create_chain(ChainParams::unbounded());

    let prepared = Arc::new(PreparedSelect::new(
        select_from_all(),
        vec![SelectCase::receive(chain.clone(), vec![on::<i32, _>(|_| {})])],
    ));

    let prepared2 = prepared.clone();
    let handle = thread::spawn(move || select_prepared(&prepared2));
    thread::sleep(Duration::from_millis(50));

    let second_call = select_prepared(&prepared);
    assert!(matches!(second_call, Err(ChainError::AlreadyActive)));

    chain.close(false);
    let first_result = handle.join().unwrap().unwrap();
    assert_eq!(first_result.closed, 1);

    // Status cleared: a third call is accepted (and returns immediately,
    // the chain already being closed).
    let third_call = select_prepared(&prepared);
    assert!(third_call.is_ok());
}

/// Scenario 6: a periodic timer cancelled after 350ms at a 100ms period
/// must have fired exactly 3 times (allowing engine-granularity slack, not
/// exceeding 4).
#[test]
fn scenario_6_periodic_timer_cancellation() {
    let config = TimerEngineConfig::default();
    let engine = Arc::new(SafeEngine::new(ListEngine::new(config.clone()), Arc::new(mchain::sink::LoggingExceptionSink)));
    let fired = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let id = engine.allocate();
    let fired2 = fired.clone();
    engine
        .activate(id, Duration::from_millis(100), Duration::from_millis(100), Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    let driver_engine = engine.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let driver_stop = stop.clone();
    let driver = thread::spawn(move || {
        while !driver_stop.load(Ordering::SeqCst) {
            driver_engine.process_expired(Instant::now());
            thread::sleep(Duration::from_millis(5));
        }
    });

    thread::sleep(Duration::from_millis(350));
    engine.deactivate(id).unwrap();
    stop.store(true, Ordering::SeqCst);
    driver.join().unwrap();

    let count = fired.load(Ordering::SeqCst);
    assert!(count == 3 || count == 4, "expected 3 (or 4 with slack) fires, got {count}");
}
