//! Capped exponential backoff for failed deliveries

use std::time::Duration;

use crate::config::UploadConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Failures after which a task is abandoned
    pub max_retries: u32,

    /// Upper bound on one backoff sleep
    pub max_backoff: Duration,

    /// Backoff after the n-th failure is `unit * 2^n`
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_backoff: Duration::from_secs(30),
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            ..Self::default()
        }
    }

    /// Whether a task that has failed `retry_count` times gets another attempt
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.max_retries
    }

    /// Sleep before the attempt following the `retry_count`-th failure
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.unit.saturating_mul(factor).min(self.max_backoff)
    }
}
