use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::BrokerError;

/// Retry behavior a step declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// Single attempt; any error fails the operation
    NonRetriable,
    /// Long budget, e.g. every ten minutes for about a day
    Standard,
    /// Short budget for quick polling steps
    Fast,
}

/// Bounded fixed-delay retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Whether attempt number `attempt` (0 = initial) may be followed by another
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Total attempts the policy permits
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Policies for each retriable class, built from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicies {
    pub standard: RetryPolicy,
    pub fast: RetryPolicy,
}

impl RetryPolicies {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            standard: RetryPolicy::new(
                config.standard_max_retries,
                Duration::from_secs(config.standard_delay_seconds),
            ),
            fast: RetryPolicy::new(
                config.fast_max_retries,
                Duration::from_secs(config.fast_delay_seconds),
            ),
        }
    }

    pub fn policy_for(&self, class: RetryClass) -> Option<RetryPolicy> {
        match class {
            RetryClass::NonRetriable => None,
            RetryClass::Standard => Some(self.standard),
            RetryClass::Fast => Some(self.fast),
        }
    }

    /// Delay before the next attempt, or `None` when the operation must fail
    pub fn next_delay(
        &self,
        class: RetryClass,
        attempt: u32,
        error: &BrokerError,
    ) -> Option<Duration> {
        let policy = self.policy_for(class)?;
        (error.is_retryable() && policy.allows_retry_after(attempt)).then_some(policy.delay)
    }
}
