//! Error taxonomy shared by every protection component.
//!
//! Components below the middleware only ever produce these kinds; mapping to
//! transport status codes happens once, in `http::response::classify`.

use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheError;
use crate::rate_limit::RateLimitResult;

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    CircuitBreakerOpen,
    Timeout,
    ConnectionError,
    QuotaExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a protected call.
#[derive(Debug, Clone, Error)]
pub enum ShieldError {
    /// Caller exceeded its local quota.
    #[error("rate limit exceeded ({} requests per window)", .0.limit)]
    RateLimited(RateLimitResult),

    /// Downstream marked unhealthy by its breaker.
    #[error("circuit breaker for {service} is open")]
    CircuitOpen { service: String, retry_after_secs: u64 },

    /// A single call exceeded its time bound.
    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    /// Store or downstream unreachable.
    #[error("connection error: {0}")]
    Connection(String),

    /// Downstream-reported hard limit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other downstream failure.
    #[error("operation failed: {0}")]
    Operation(String),
}

impl ShieldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShieldError::RateLimited(_) => ErrorKind::RateLimited,
            ShieldError::CircuitOpen { .. } => ErrorKind::CircuitBreakerOpen,
            ShieldError::Timeout { .. } => ErrorKind::Timeout,
            ShieldError::Connection(_) => ErrorKind::ConnectionError,
            ShieldError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            ShieldError::Operation(_) => ErrorKind::Internal,
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ShieldError::Connection(msg.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        ShieldError::Operation(msg.into())
    }
}

impl From<CacheError> for ShieldError {
    fn from(err: CacheError) -> Self {
        ShieldError::Connection(err.to_string())
    }
}
