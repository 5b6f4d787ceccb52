//! Capped exponential backoff with symmetric jitter.
//!
//! Retry delays grow as `base_delay * multiplier^retry_count`, capped at
//! `max_delay`, then randomized by ±jitter so a burst of failures does not
//! come back as a synchronized retry storm.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule for failed sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Symmetric jitter fraction (0.0 to 1.0) applied to the capped delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(6 * 60 * 60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Nominal delay for an entry that has failed `retry_count` times
    /// before the current attempt, without jitter.
    pub fn nominal_delay(&self, retry_count: u32) -> Duration {
        // Cap the exponent so the f64 never overflows; the max_delay clamp
        // dominates long before this matters.
        let exponent = i32::try_from(retry_count.min(32)).unwrap_or(32);
        let factor = self.multiplier.powi(exponent);
        let seconds = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(seconds)
    }

    /// Jittered delay for the next retry.
    pub fn delay(&self, retry_count: u32) -> Duration {
        apply_jitter(self.nominal_delay(retry_count), self.jitter)
    }

    /// Wall-clock watermark for the next retry of an entry that failed at
    /// `failed_at` with `retry_count` prior failures.
    pub fn next_retry_at(&self, failed_at: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = self.delay(retry_count);
        failed_at + TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX)
    }
}

/// Randomizes `duration` by ±`jitter` fraction.
fn apply_jitter(duration: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return duration;
    }
    let jitter = jitter.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * jitter;
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy { jitter: 0.0, ..BackoffPolicy::default() }
    }

    #[test]
    fn nominal_delays_double_per_retry() {
        let policy = no_jitter();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(60));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(120));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(240));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(480));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = no_jitter();
        assert_eq!(policy.nominal_delay(30), policy.max_delay);
        // Exponent saturation must not panic or overflow.
        assert_eq!(policy.nominal_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn nominal_delay_is_monotonically_non_decreasing() {
        let policy = no_jitter();
        let mut previous = Duration::ZERO;
        for retry_count in 0..24 {
            let delay = policy.nominal_delay(retry_count);
            assert!(delay >= previous, "delay shrank at retry {retry_count}");
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_within_ten_percent_of_nominal() {
        let policy = BackoffPolicy::default();
        for retry_count in 0..8 {
            let nominal = policy.nominal_delay(retry_count).as_secs_f64();
            for _ in 0..50 {
                let jittered = policy.delay(retry_count).as_secs_f64();
                assert!(jittered >= nominal * 0.9 - 1e-6);
                assert!(jittered <= nominal * 1.1 + 1e-6);
            }
        }
    }

    #[test]
    fn jitter_produces_variation() {
        let policy = BackoffPolicy { jitter: 0.5, ..BackoffPolicy::default() };
        let seen: std::collections::HashSet<u128> =
            (0..20).map(|_| policy.delay(2).as_nanos()).collect();
        assert!(seen.len() > 1, "jitter should vary the delay");
    }

    #[test]
    fn next_retry_at_offsets_from_failure_time() {
        let policy = no_jitter();
        let failed_at = Utc::now();
        let at = policy.next_retry_at(failed_at, 1);
        assert_eq!(at - failed_at, TimeDelta::seconds(120));
    }
}
