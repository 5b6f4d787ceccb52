//! Clock abstraction for testable timing behavior.
//!
//! The circuit breaker's open-timeout and the queue's retry watermarks are
//! time-driven; injecting a clock lets tests advance time deterministically
//! instead of sleeping.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeDelta, Utc};

/// Time source for the delivery core.
///
/// Production code uses [`RealClock`]; tests inject a [`TestClock`] and
/// advance it explicitly.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic instant, for duration measurements.
    fn now(&self) -> Instant;

    /// Current wall-clock time, for persisted timestamps.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests.
///
/// Both the monotonic and the wall-clock reading advance together through
/// [`TestClock::advance`]; nothing moves on its own.
#[derive(Debug, Clone)]
pub struct TestClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock anchored at the current time.
    pub fn new() -> Self {
        Self { base_instant: Instant::now(), base_utc: Utc::now(), offset_ns: Arc::new(AtomicU64::new(0)) }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(ns, Ordering::AcqRel);
    }

    fn offset(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.base_utc + TimeDelta::from_std(self.offset()).unwrap_or(TimeDelta::MAX)
    }
}
