//! Producer-side operations: plain sends, timer-backed delayed/periodic
//! sends, and the request/reply pair built on [`crate::reply`].

use std::time::Duration;

use crate::chain::{Chain, PushMode, PushOutcome};
use crate::envelope::{Envelope, TypeTag};
use crate::error::{ChainError, ChainResult};
use crate::reply::{self, ReplyFuture, ServiceRequest};
use crate::timer::thread::SafeEngine;
use crate::timer::{TimerEngine, TimerId};

/// Push an immutable, multi-consumer-safe message of type `T`.
pub fn send<T: Send + Sync + 'static>(chain: &Chain, message: T) -> ChainResult<PushOutcome> {
    chain.push(TypeTag::of::<T>(), Envelope::immutable(message), PushMode::Ordinary)
}

/// Push a mutable, single-consumer message of type `T`. Fails with
/// `ChainError::MutabilityViolation` unless `chain` was built with
/// `with_single_consumer(true)`.
pub fn send_mutable<T: Send + 'static>(chain: &Chain, message: T) -> ChainResult<PushOutcome> {
    chain.push(TypeTag::of::<T>(), Envelope::mutable(message), PushMode::Ordinary)
}

/// Arm a one-shot timer that pushes `message` onto `chain` after `delay`.
/// Returns the timer's id so the send can be cancelled before it fires via
/// `engine.deactivate(id)`.
pub fn send_delayed<T, E>(chain: &Chain, engine: &SafeEngine<E>, delay: Duration, message: T) -> ChainResult<TimerId>
where
    T: Send + Sync + 'static,
    E: TimerEngine,
{
    let id = engine.allocate();
    let chain = chain.clone();
    let mut message = Some(message);
    engine.activate(
        id,
        delay,
        Duration::ZERO,
        Box::new(move || {
            if let Some(message) = message.take() {
                let _ = chain.push(TypeTag::of::<T>(), Envelope::immutable(message), PushMode::FromTimer);
            }
        }),
    )?;
    Ok(id)
}

/// Arm a periodic timer that pushes a fresh, immutable message onto `chain`
/// every `period`, starting after `initial_delay`. `message_factory` is
/// called once per tick so each delivery can carry distinct state.
/// `period == Duration::ZERO` is a one-shot send, same as `send_delayed`.
pub fn send_periodic<T, E, F>(
    chain: &Chain,
    engine: &SafeEngine<E>,
    initial_delay: Duration,
    period: Duration,
    mut message_factory: F,
) -> ChainResult<TimerId>
where
    T: Send + Sync + 'static,
    E: TimerEngine,
    F: FnMut() -> T + Send + 'static,
{
    let id = engine.allocate();
    let chain = chain.clone();
    engine.activate(
        id,
        initial_delay,
        period,
        Box::new(move || {
            let message = message_factory();
            let _ = chain.push(TypeTag::of::<T>(), Envelope::immutable(message), PushMode::FromTimer);
        }),
    )?;
    Ok(id)
}

/// Arm a periodic timer that pushes a fresh, mutable single-consumer message
/// onto `chain` every `period`, starting after `initial_delay`.
///
/// Periodic delivery of a mutable message with a non-zero `period` is
/// rejected with `ChainError::InvalidPeriodic` — a mutable payload has only
/// one consumer, so a recurring timer firing the same envelope shape into a
/// single-consumer chain would let "every Nth tick" silently starve whichever
/// consumer isn't fast enough, which the single-consumer invariant forbids.
/// `period == Duration::ZERO` (one-shot) is unaffected and behaves like
/// `send_delayed` for a mutable payload.
pub fn send_periodic_mutable<T, E, F>(
    chain: &Chain,
    engine: &SafeEngine<E>,
    initial_delay: Duration,
    period: Duration,
    mut message_factory: F,
) -> ChainResult<TimerId>
where
    T: Send + 'static,
    E: TimerEngine,
    F: FnMut() -> T + Send + 'static,
{
    if !period.is_zero() {
        return Err(ChainError::InvalidPeriodic {
            type_name: std::any::type_name::<T>(),
        });
    }
    let id = engine.allocate();
    let chain = chain.clone();
    engine.activate(
        id,
        initial_delay,
        period,
        Box::new(move || {
            let message = message_factory();
            let _ = chain.push(TypeTag::of::<T>(), Envelope::mutable(message), PushMode::FromTimer);
        }),
    )?;
    Ok(id)
}

/// Build a service-request envelope, push it onto `chain`, and return a
/// future the caller can block on for the reply.
pub fn request_future<Req, Resp>(chain: &Chain, request: Req) -> ChainResult<ReplyFuture<Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let (slot, future) = reply::channel::<Resp>();
    let envelope = ServiceRequest { request, reply: slot };
    send_mutable(chain, envelope)?;
    Ok(future)
}

/// Synchronous request/reply: blocks up to `timeout` for a reply, raising
/// `ChainError::NoResult` if none arrives in time.
pub fn request_value<Req, Resp>(chain: &Chain, request: Req, timeout: Duration) -> ChainResult<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    request_future::<Req, Resp>(chain, request)?.wait_timeout(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainParams;
    use crate::handler::on_mut;
    use crate::receive::{from_all, receive};
    use crate::timer::list::ListEngine;
    use crate::timer::TimerEngineConfig;
    use std::time::Instant;

    #[test]
    fn send_stores_immutable_message() {
        let chain = Chain::new(ChainParams::unbounded());
        send(&chain, 5i32).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn send_mutable_requires_single_consumer_chain() {
        let chain = Chain::new(ChainParams::unbounded());
        let result = send_mutable(&chain, String::from("x"));
        assert!(result.is_err());
    }

    #[test]
    fn send_delayed_pushes_after_timer_fires() {
        let chain = Chain::new(ChainParams::unbounded());
        let engine = SafeEngine::new(ListEngine::new(TimerEngineConfig::default()), std::sync::Arc::new(crate::sink::LoggingExceptionSink));
        let start = Instant::now();
        send_delayed::<i32, _>(&chain, &engine, Duration::from_millis(30), 9).unwrap();
        assert!(chain.is_empty());

        // Drive the engine manually; no background thread in this test.
        loop {
            engine.process_expired(Instant::now());
            if !engine.is_empty() || chain.len() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let result = receive(&chain, from_all().wait(Duration::from_secs(1)).handle_n(1), vec![]);
        assert_eq!(result.extracted, 1);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn send_periodic_allows_zero_period_as_one_shot() {
        let chain = Chain::new(ChainParams::unbounded());
        let engine = SafeEngine::new(ListEngine::new(TimerEngineConfig::default()), std::sync::Arc::new(crate::sink::LoggingExceptionSink));
        let result = send_periodic::<i32, _, _>(&chain, &engine, Duration::ZERO, Duration::ZERO, || 1);
        assert!(result.is_ok());
    }

    #[test]
    fn send_periodic_mutable_rejects_nonzero_period() {
        let chain = Chain::new(ChainParams::unbounded().with_single_consumer(true));
        let engine = SafeEngine::new(ListEngine::new(TimerEngineConfig::default()), std::sync::Arc::new(crate::sink::LoggingExceptionSink));
        let result = send_periodic_mutable::<String, _, _>(&chain, &engine, Duration::ZERO, Duration::from_millis(10), || "x".to_string());
        assert!(matches!(result, Err(ChainError::InvalidPeriodic { .. })));
    }

    #[test]
    fn send_periodic_mutable_allows_zero_period_as_one_shot() {
        let chain = Chain::new(ChainParams::unbounded().with_single_consumer(true));
        let engine = SafeEngine::new(ListEngine::new(TimerEngineConfig::default()), std::sync::Arc::new(crate::sink::LoggingExceptionSink));
        let result = send_periodic_mutable::<String, _, _>(&chain, &engine, Duration::ZERO, Duration::ZERO, || "x".to_string());
        assert!(result.is_ok());
    }

    #[test]
    fn request_value_times_out_with_no_handler() {
        let chain = Chain::new(ChainParams::unbounded().with_single_consumer(true));
        let result: ChainResult<i32> = request_value(&chain, "ping".to_string(), Duration::from_millis(10));
        assert!(matches!(result, Err(ChainError::NoResult)));
    }

    #[test]
    fn request_future_is_fulfilled_by_handler() {
        let chain = Chain::new(ChainParams::unbounded().with_single_consumer(true));
        let future = request_future::<String, i32>(&chain, "ping".to_string()).unwrap();

        let responder_chain = chain.clone();
        let handle = std::thread::spawn(move || {
            receive(
                &responder_chain,
                from_all().wait(Duration::from_secs(1)).handle_n(1),
                vec![on_mut::<ServiceRequest<String, i32>, _>(|req| {
                    assert_eq!(req.request, "ping");
                    req.reply(42);
                })],
            )
        });

        assert_eq!(future.wait().unwrap(), 42);
        handle.join().unwrap();
    }
}
