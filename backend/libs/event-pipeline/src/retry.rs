//! Handler retry policy with exponential backoff and jitter

use rand::Rng;
use std::time::Duration;

/// Handler invocations per message, first attempt included
pub const MAX_HANDLER_ATTEMPTS: u32 = 3;

/// Delay after the first failed attempt
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Random spread applied to every delay (±25%)
pub const RETRY_JITTER: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts before the message is dead-lettered (at least 1)
    pub max_attempts: u32,
    /// Delay after attempt 1; doubles for each later attempt
    pub base_delay: Duration,
    /// Jitter fraction in `[0, 1)`; 0 disables it
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_HANDLER_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
            jitter: RETRY_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempt + 1`, without jitter
    ///
    /// `base * 2^(failed_attempt - 1)`: 500ms, 1s, 2s, ... with the defaults.
    pub fn base_backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Delay before attempt `failed_attempt + 1`, with jitter applied
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        apply_jitter(self.base_backoff(failed_attempt), self.jitter, &mut rand::thread_rng())
    }
}

fn apply_jitter<R: Rng>(delay: Duration, jitter: f64, rng: &mut R) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }

    let jitter = jitter.min(0.99);
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.jitter, 0.25);
    }

    #[test]
    fn test_exponential_base_backoff() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.base_backoff(1), Duration::from_millis(500));
        assert_eq!(policy.base_backoff(2), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(3), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();

        for attempt in 1..=3 {
            let base = policy.base_backoff(attempt);
            let low = base.mul_f64(0.75);
            let high = base.mul_f64(1.25);

            for _ in 0..200 {
                let delay = policy.backoff(attempt);
                assert!(
                    delay >= low && delay <= high,
                    "attempt {attempt}: {delay:?} outside [{low:?}, {high:?}]"
                );
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };

        assert_eq!(policy.backoff(2), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.base_backoff(u32::MAX) > Duration::from_secs(3600));
    }

    #[test]
    fn test_jitter_on_saturated_delay_does_not_panic() {
        let policy = RetryPolicy {
            base_delay: Duration::MAX,
            ..Default::default()
        };

        for attempt in 1..=3 {
            assert!(policy.backoff(attempt) > Duration::from_secs(3600));
        }
    }
}
