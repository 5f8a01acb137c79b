//! Retry policy for transient conflicts.
//!
//! Optimistic writes lose races: a CAS on a counter, an append with a stale
//! expected version. Those conflicts are transient and retried under a
//! bounded policy. Domain rejections are deterministic and never go through
//! here.

use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// Doubling delay, capped at `max_delay`.
    Exponential,
}

/// Bounded retry with deterministic jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor in `[0.0, 1.0]`, spread around the computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay before the attempt after `attempt` failures (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_delay);

        if self.jitter <= 0.0 {
            return capped;
        }

        // Deterministic pseudo-jitter: spreads concurrent retries without
        // pulling in an RNG.
        let unit = ((f64::from(attempt) * 17.0) % 100.0) / 100.0;
        let spread = 1.0 + self.jitter * (unit - 0.5);
        capped.mul_f64(spread)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
