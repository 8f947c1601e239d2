//! # Backoff Calculator
//!
//! Exponential delay schedule for processes declared with
//! [`FailurePolicy::RetryWithBackoff`](crate::registry::FailurePolicy).
//!
//! `delay(n) = min(base * multiplier^(n - 1), max)` where `n` is the attempts
//! count after the failed step, so the first retry waits `base`.

use crate::config::BackoffConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exponential = base * self.config.multiplier.powi(exponent);

        // powi overflows to +inf for large exponents; min() still caps it
        let delay_ms = if exponential.is_finite() {
            exponential.min(max)
        } else {
            max
        };
        Duration::from_millis(delay_ms as u64)
    }

    pub fn next_run_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempts);
        let delay = chrono::Duration::from_std(delay)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.config.max_delay_ms as i64));
        now + delay
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
