//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional TOML file (EDU_SHIELD_CONFIG)
//!     → loader.rs (parse & deserialize, re-add built-in breakers)
//!     → environment overrides (REDIS_URL, CACHE_KEY_PREFIX, ...)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → consumed once by lifecycle::startup
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, load_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerConfig, ListenerConfig, ObservabilityConfig,
    RateLimitConfig, RateLimitRuleConfig, RetryConfig, ShieldConfig, TimeoutConfig,
};
