//! Retry delay calculation.
//!
//! `base = min(min_delay * factor^attempt, max_delay)`. With jitter enabled the
//! delay is drawn uniformly from `[base/2, base]`, which spreads retries from
//! clients that failed together while never exceeding the un-jittered value.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryPolicy;

/// Maps an attempt number to the delay before the next try.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Un-jittered delay in milliseconds. Overflow saturates to `max_delay_ms`.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let max = self.policy.max_delay_ms;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let grown = self.policy.min_delay_ms as f64 * self.policy.factor.max(0.0).powi(exponent);
        if grown.is_nan() || grown >= max as f64 {
            return max;
        }
        grown as u64
    }

    /// Delay before retrying after `attempt` failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::rng())
    }

    /// Same as [`Backoff::delay`] with a caller-supplied RNG (for testing)
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_ms(attempt);
        if !self.policy.jitter || base == 0 {
            return Duration::from_millis(base);
        }
        let half = base / 2;
        Duration::from_millis(half + rng.random_range(0..=base - half))
    }
}
