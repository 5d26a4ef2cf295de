//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Protected call to a downstream:
//!     → circuit_breaker.rs (admit, or short-circuit to fallback / CIRCUIT_BREAKER_OPEN)
//!     → timeouts.rs (bound the whole call, retries included)
//!     → retries.rs (retry retryable failures with backoff.rs delays)
//!     → circuit_breaker.rs (record one success or one failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every protected call has a deadline
//! - A burst of retries counts once against the breaker
//! - Breaker state lives in the cache store, so instances sharing a
//!   durable cache share breaker state

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerState, CircuitState, Outcome,
};
pub use retries::{RetryPolicy, Retryable};
pub use timeouts::with_timeout;
