//! Bounded retry policies for persistence boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after every attempt, capped at `max_delay_ms`.
    Exponential {
        /// Upper bound for a single delay.
        max_delay_ms: u64,
    },
}

/// Retry policy: at most `max_attempts` executions, separated by `delay`.
///
/// Only errors for which [`SchedulerError::is_retryable`] holds are retried; all
/// other failures are returned on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Exponential policy starting at `delay`.
    pub const fn exponential(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Exponential {
                max_delay_ms: max_delay.as_millis() as u64,
            },
        }
    }

    /// Policy from explicit parts.
    pub const fn with_backoff(max_attempts: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            delay,
            backoff,
        }
    }

    /// Policy that never retries.
    pub const fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Maximum number of executions.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay_ms } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay
                    .saturating_mul(factor)
                    .min(Duration::from_millis(max_delay_ms))
            }
        }
    }

    /// Run a blocking operation under this policy.
    ///
    /// Sleeps with [`std::thread::sleep`] between attempts, so it is meant for
    /// synchronous callers. Code running on a tokio worker uses
    /// [`retry_async`](Self::retry_async).
    pub fn retry<T, F>(&self, operation: &str, mut op: F) -> Result<T, SchedulerError>
    where
        F: FnMut() -> Result<T, SchedulerError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(operation, attempt, error = %err, "retrying");
                    std::thread::sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(operation, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Run an async operation under this policy.
    pub async fn retry_async<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SchedulerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SchedulerError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(operation, attempt, error = %err, "retrying");
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(operation, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_millis(100))
    }
}
