//! Retry timing for transient sync failures.

use std::time::Duration;

/// Exponential backoff with a hard cap and bounded attempts.
///
/// The delay for attempt `n` (zero-based) is `base * 2^n` plus jitter,
/// clamped to `max_delay`. Jitter is a fraction of the computed delay so
/// stations that lost connectivity together do not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps and never retries, for tests and for
    /// callers that do their own scheduling.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        }
    }

    /// Delay before retrying after the given failed attempt, or `None`
    /// once the attempt budget is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        Some(self.delay_with_jitter(attempt, rand::random::<f64>()))
    }

    /// Deterministic variant: `unit` is the jitter draw in `[0, 1)`.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let exp = attempt.min(20);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let jitter = scaled.mul_f64(self.jitter_ratio * unit.clamp(0.0, 1.0));
        (scaled + jitter).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_millis(100));
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_millis(200));
        assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_millis(400));
        assert_eq!(policy.delay_with_jitter(5, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_with_jitter(19, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.delay_for(0).is_some());
        assert!(policy.delay_for(1).is_some());
        assert!(policy.delay_for(2).is_none());
        assert!(policy.delay_for(100).is_none());
    }

    #[test]
    fn none_policy_never_retries() {
        assert!(RetryPolicy::none().delay_for(0).is_none());
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 0u32..64, unit in 0.0f64..1.0) {
            let policy = RetryPolicy::default();
            let delay = policy.delay_with_jitter(attempt, unit);
            prop_assert!(delay <= policy.max_delay);
        }

        #[test]
        fn jitter_never_shrinks_the_delay(attempt in 0u32..10, unit in 0.0f64..1.0) {
            let policy = RetryPolicy {
                max_attempts: 32,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(60),
                jitter_ratio: 0.25,
            };
            let plain = policy.delay_with_jitter(attempt, 0.0);
            let jittered = policy.delay_with_jitter(attempt, unit);
            prop_assert!(jittered >= plain);
        }
    }
}
