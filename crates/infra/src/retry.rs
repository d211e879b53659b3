//! Bounded retry for optimistic-concurrency conflicts on the ledger.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the wait between conflict retries grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Retry budget for a decision that lost the race to another writer.
///
/// `max_attempts` counts retries, not the first try: a policy with
/// `max_attempts = 3` runs the decision at most four times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// 0.0..=1.0, fraction of the delay spread around the nominal value.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
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
            jitter: 0.2,
        }
    }

    /// Wait before retry number `attempt` (1-based). Retry 0 never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_us = self.base_delay.as_micros() as f64;
        let max_us = self.max_delay.as_micros() as f64;

        let nominal = match self.strategy {
            BackoffStrategy::Fixed => base_us,
            BackoffStrategy::Exponential => (base_us * 2_f64.powi((attempt - 1) as i32)).min(max_us),
            BackoffStrategy::Linear => (base_us * f64::from(attempt)).min(max_us),
        };

        let spread = nominal * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            let pseudo_random = (f64::from(attempt) * 17.0 % 100.0) / 100.0;
            spread * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_micros((nominal + offset).max(0.0) as u64)
    }

    /// `retries_so_far` retries have already run.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_attempts
    }
}
