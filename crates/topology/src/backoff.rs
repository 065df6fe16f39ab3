//! Capped exponential backoff with jitter.
//!
//! `delay(attempt) = min(initial * 2^(attempt-1), max) * (1 + j)` where `j` is
//! uniform in `[-0.1, 0.1]`. Attempts are 1-based; the exponent is clamped so
//! the multiplication cannot overflow.

use std::time::Duration;

use rand::Rng;

/// Largest exponent applied to the initial backoff.
const MAX_EXPONENT: u32 = 30;

/// Jitter factor applied in both directions.
const JITTER: f64 = 0.1;

/// Returns the jittered delay for a 1-based attempt number.
///
/// Uses the thread-local RNG. See [`backoff_delay_with`] for a seeded variant.
#[must_use]
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    backoff_delay_with(&mut rand::rng(), attempt, initial, max)
}

/// Returns the jittered delay for a 1-based attempt number using the given RNG.
#[must_use]
pub fn backoff_delay_with<R: Rng + ?Sized>(
    rng: &mut R,
    attempt: u32,
    initial: Duration,
    max: Duration,
) -> Duration {
    let base = base_delay(attempt, initial, max);
    let jitter = rng.random_range(-JITTER..=JITTER);
    let nanos = base.as_nanos() as f64 * (1.0 + jitter);
    // Float-to-int casts saturate, so only the lower bound needs clamping.
    Duration::from_nanos(nanos.max(0.0) as u64)
}

/// Returns the un-jittered delay `min(initial * 2^(attempt-1), max)`.
///
/// Attempt `0` is treated as attempt `1`.
#[must_use]
pub fn base_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    initial.checked_mul(1u32 << exponent).map_or(max, |delay| delay.min(max))
}

/// Initial and maximum backoff, bundled for the components that retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Creates a policy. `max` is raised to `initial` if smaller.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial) }
    }

    /// Returns the initial backoff.
    #[must_use]
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Returns the backoff cap.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the jittered delay for a 1-based attempt number.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.initial, self.max)
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod proptest_tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    proptest! {
        /// Property: backoff(a+1) stays within ±10% of min(initial * 2^a, max).
        #[test]
        fn prop_backoff_within_jitter_bounds(
            a in 0u32..30,
            initial_ms in 1u64..10_000,
            max_ms in 1u64..600_000,
            seed in any::<u64>(),
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(max_ms.max(initial_ms));
            let mut rng = StdRng::seed_from_u64(seed);

            let delay = backoff_delay_with(&mut rng, a + 1, initial, max);

            let base = initial.saturating_mul(1u32 << a).min(max).as_nanos() as f64;
            let lower = Duration::from_nanos((base * 0.9).floor() as u64);
            let upper = Duration::from_nanos((base * 1.1).ceil() as u64);
            prop_assert!(delay >= lower, "delay {:?} below {:?}", delay, lower);
            prop_assert!(delay <= upper, "delay {:?} above {:?}", delay, upper);
        }

        /// Property: the un-jittered delay never decreases as attempts grow.
        #[test]
        fn prop_base_delay_monotonic(
            a in 1u32..64,
            initial_ms in 0u64..10_000,
            max_ms in 0u64..600_000,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(max_ms);
            prop_assert!(base_delay(a + 1, initial, max) >= base_delay(a, initial, max));
        }
    }
}
