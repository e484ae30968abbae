//! Monotonic clock abstraction and the remaining-time counter.
//!
//! Every wait loop in this crate (chain extract/push waits, receive,
//! select) is built on top of [`RemainingTime`] so that "infinite wait" is a
//! real enum variant rather than a huge `Duration` sentinel fed into a
//! condition-variable timeout.

use std::time::{Duration, Instant};

/// A source of monotonic time. Exists so tests can supply a fake clock
/// without needing to actually sleep.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic timepoint.
    fn now(&self) -> Instant;
}

/// The default clock, backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A wait budget that is either infinite or a finite, decrementing duration.
///
/// `Infinite` never flows into an OS wait primitive as a timepoint: callers
/// must branch on `is_infinite()` and use a predicate-based, untimed wait in
/// that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingTime {
    Infinite,
    Finite(Duration),
}

impl RemainingTime {
    pub fn from_duration(d: Duration) -> Self {
        RemainingTime::Finite(d)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, RemainingTime::Infinite)
    }

    /// Returns `true` once the budget has been exhausted (`Finite(ZERO)`).
    /// `Infinite` is never exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RemainingTime::Finite(d) if d.is_zero())
    }

    /// Consume `elapsed` from the budget, saturating at zero.
    pub fn consume(&mut self, elapsed: Duration) {
        if let RemainingTime::Finite(d) = self {
            *d = d.saturating_sub(elapsed);
        }
    }

    /// Smaller of `self` and `other`, where `Infinite` loses to anything
    /// finite. Used to clamp an empty-timeout wait to whatever total-time
    /// budget remains (spec: "always compute the next wait as
    /// `min(remaining_empty_timeout, remaining_total_time)`").
    pub fn min(self, other: RemainingTime) -> RemainingTime {
        match (self, other) {
            (RemainingTime::Infinite, x) | (x, RemainingTime::Infinite) => x,
            (RemainingTime::Finite(a), RemainingTime::Finite(b)) => {
                RemainingTime::Finite(a.min(b))
            }
        }
    }

    /// The `Duration` to hand to a timed wait primitive, or `None` when the
    /// wait should block without a deadline.
    pub fn as_wait_duration(&self) -> Option<Duration> {
        match self {
            RemainingTime::Infinite => None,
            RemainingTime::Finite(d) => Some(*d),
        }
    }
}

/// Tracks an absolute deadline derived from a [`RemainingTime`] budget taken
/// at entry to a call (spec 4.4: "total_time is measured once at entry").
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    inner: Option<Instant>,
}

impl Deadline {
    pub fn from_remaining(clock: &dyn Clock, remaining: RemainingTime) -> Self {
        let inner = match remaining {
            RemainingTime::Infinite => None,
            RemainingTime::Finite(d) => Some(clock.now() + d),
        };
        Deadline { inner }
    }

    pub fn none() -> Self {
        Deadline { inner: None }
    }

    /// Time left until the deadline, as a `RemainingTime`. Never negative.
    pub fn remaining(&self, clock: &dyn Clock) -> RemainingTime {
        match self.inner {
            None => RemainingTime::Infinite,
            Some(at) => {
                let now = clock.now();
                if now >= at {
                    RemainingTime::Finite(Duration::ZERO)
                } else {
                    RemainingTime::Finite(at - now)
                }
            }
        }
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        matches!(self.inner, Some(at) if clock.now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_min_picks_smaller() {
        let a = RemainingTime::Finite(Duration::from_millis(50));
        let b = RemainingTime::Finite(Duration::from_millis(10));
        assert_eq!(a.min(b), RemainingTime::Finite(Duration::from_millis(10)));
    }

    #[test]
    fn infinite_loses_to_finite() {
        let a = RemainingTime::Infinite;
        let b = RemainingTime::Finite(Duration::from_millis(10));
        assert_eq!(a.min(b), b);
        assert_eq!(b.min(a), b);
    }

    #[test]
    fn consume_saturates_at_zero() {
        let mut r = RemainingTime::Finite(Duration::from_millis(5));
        r.consume(Duration::from_millis(50));
        assert!(r.is_exhausted());
    }

    #[test]
    fn deadline_from_infinite_never_expires() {
        let deadline = Deadline::from_remaining(&SystemClock, RemainingTime::Infinite);
        assert!(!deadline.is_expired(&SystemClock));
        assert!(deadline.remaining(&SystemClock).is_infinite());
    }
}
