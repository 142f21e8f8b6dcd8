//! Bounded retry decisions for failed verifications.

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

/// What to do after a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryDecision {
    /// Move on to approval (passed, or the budget is spent).
    Proceed,
    /// Go back to generation with the failure output attached.
    Retry,
}

/// Pure retry policy over a fixed budget of generate-verify cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` cycles. Zero is treated as one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts)
    }

    /// Returns the cycle budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides the next step for a verification at `iteration` (0-based retries so far).
    pub fn decide(&self, passed: bool, iteration: u32) -> RetryDecision {
        if passed {
            return RetryDecision::Proceed;
        }
        // iteration counts cycles already retried; this cycle is number iteration + 1
        if iteration.saturating_add(1) < self.max_attempts {
            RetryDecision::Retry
        } else {
            RetryDecision::Proceed
        }
    }
}
