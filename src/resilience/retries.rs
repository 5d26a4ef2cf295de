//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failure is retryable
//! - Execute retries with exponential backoff + jitter
//! - Stop early when a deadline would be crossed
//!
//! # Design Decisions
//! - Quota, open-circuit and rate-limit failures are final; retrying cannot help
//! - The last underlying error is returned unchanged
//! - No state is shared between executions
//! - Sleeps are plain `tokio::time::sleep`, so dropping the future cancels them

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::{ErrorKind, ShieldError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Errors that know whether another attempt is worthwhile.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Low-cardinality label for metrics.
    fn retry_label(&self) -> &'static str {
        "error"
    }
}

impl Retryable for ShieldError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::QuotaExceeded | ErrorKind::CircuitBreakerOpen | ErrorKind::RateLimited
        )
    }

    fn retry_label(&self) -> &'static str {
        self.kind().as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
        )
    }

    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.run(None, op).await
    }

    /// Like `execute`, but gives up instead of sleeping past `deadline`.
    pub async fn execute_until<T, E, F, Fut>(&self, deadline: Instant, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.run(Some(deadline), op).await
    }

    async fn run<T, E, F, Fut>(&self, deadline: Option<Instant>, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.max_retries || !err.is_retryable() {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    tracing::debug!(attempt, error = %err, "Retry would cross deadline, giving up");
                    return Err(err);
                }
            }

            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying operation"
            );
            metrics::record_retry(err.retry_label());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_retries,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
