//! Request protection for an education platform's backend.
//!
//! Fixed-window rate limiting, cache-persisted circuit breakers and retry
//! with backoff, composed around downstream calls (AI tutor, database,
//! third-party APIs) by [`Shield`].

// Core
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod shield;

// Protection components
pub mod rate_limit;
pub mod resilience;

// Surfaces
pub mod admin;
pub mod health;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use cache::CacheStore;
pub use config::schema::ShieldConfig;
pub use error::{ErrorKind, ShieldError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rate_limit::{RateLimitClass, RateLimitResult};
pub use resilience::{Outcome, RetryPolicy};
pub use shield::{Guarded, ProtectionProfile, Shield};
