//! Backoff for throttled provider calls.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use super::UpstreamError;
use crate::config::RetryConfig;

/// Fixed attempt count with doubling delays.
///
/// Only rate-limit errors are retried. The delay before attempt `n + 1` is
/// `initial * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` until it succeeds, fails with a non-throttling error, or the
    /// attempts run out.
    pub async fn run<F, Fut, T>(&self, label: &str, op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        op.retry(self.backoff())
            .when(UpstreamError::is_rate_limited)
            .notify(|err: &UpstreamError, delay: Duration| {
                warn!(
                    label,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Provider rate limited, retrying"
                );
            })
            .await
    }
}
