// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! What happens to a batch the sink refused.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total sink calls per batch, including the first. Zero behaves as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep after the given failed attempt (1-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Retry first; once retries are exhausted, spill to `spill_path` if set,
/// otherwise drop the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub retry: RetryPolicy,
    pub spill_path: Option<PathBuf>,
}

impl DeliveryPolicy {
    /// One attempt, no spill: a failed batch is lost (logged and counted).
    pub fn drop_on_failure() -> Self {
        Self {
            retry: RetryPolicy::none(),
            spill_path: None,
        }
    }

    pub fn with_spill(mut self, path: impl Into<PathBuf>) -> Self {
        self.spill_path = Some(path.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
