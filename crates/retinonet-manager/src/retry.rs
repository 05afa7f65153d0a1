//! Retry backoff after failed loads

use retinonet_core::ModelConfig;
use std::time::Duration;

/// Exponential backoff between failed load attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound on the delay
    pub max: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Retry immediately after every failure
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Build the policy from model configuration
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            Duration::from_secs(config.retry_initial_backoff_secs),
            Duration::from_secs(config.retry_max_backoff_secs),
        )
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 || self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.initial.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}
