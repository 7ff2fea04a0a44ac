//! Exponential backoff for retryable probe failures

use std::time::Duration;
use rand::Rng;

/// Upper bound on `max_retries` accepted by the prober
pub const MAX_RETRIES_CEILING: u32 = 5;

/// `delay = min(base * multiplier^attempt + jitter, max_delay)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_millis(5000),
            max_jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting at all
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based) with the given jitter
    pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt` with random jitter
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = self.max_jitter.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };
        self.delay_for(attempt, jitter)
    }
}
