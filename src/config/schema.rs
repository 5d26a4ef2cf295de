//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitClass;
use crate::resilience::circuit_breaker::{AZURE_OPENAI, EXTERNAL, SUPABASE};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Ops server listener.
    pub listener: ListenerConfig,

    /// Cache backend selection and key layout.
    pub cache: CacheConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Named circuit breakers, keyed by service name.
    pub circuit_breakers: BTreeMap<String, CircuitBreakerConfig>,

    /// Default retry policy.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoints.
    pub admin: AdminConfig,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breakers: builtin_circuit_breakers(),
            retries: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl ShieldConfig {
    /// Re-add any built-in breaker a config file left out.
    pub fn with_builtin_breakers(mut self) -> Self {
        for (name, breaker) in builtin_circuit_breakers() {
            self.circuit_breakers.entry(name).or_insert(breaker);
        }
        self
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Cache store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Durable store connection string. Absent selects the in-memory store.
    pub redis_url: Option<String>,

    /// Root prepended to every namespaced key.
    pub key_prefix: String,

    /// Upper bound on any single durable-store command, in milliseconds.
    pub command_timeout_ms: u64,

    /// Entry cap for the in-memory store (`None` = unbounded).
    pub max_memory_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "edu".to_string(),
            command_timeout_ms: 2_000,
            max_memory_entries: Some(100_000),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Chance that a check on the in-process limiter also sweeps expired windows.
    pub cleanup_probability: f64,

    /// Per-class replacements for the built-in rules.
    pub overrides: BTreeMap<RateLimitClass, RateLimitRuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cleanup_probability: 0.01,
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RateLimitRuleConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

/// Per-service circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring period that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial is allowed.
    pub reset_timeout_secs: u64,

    /// Failures further apart than this restart the count.
    pub monitoring_period_secs: u64,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Concurrent half-open trials per process (defaults to `success_threshold`).
    pub half_open_max_calls: Option<u32>,

    /// Degraded payload served while open.
    pub fallback: Option<serde_json::Value>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 60,
            monitoring_period_secs: 120,
            success_threshold: 2,
            half_open_max_calls: None,
            fallback: None,
        }
    }
}

/// The three downstreams every deployment protects.
pub fn builtin_circuit_breakers() -> BTreeMap<String, CircuitBreakerConfig> {
    let mut breakers = BTreeMap::new();
    breakers.insert(
        AZURE_OPENAI.to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            monitoring_period_secs: 60,
            success_threshold: 3,
            half_open_max_calls: None,
            fallback: Some(serde_json::json!({
                "degraded": true,
                "error": "AI service temporarily unavailable",
                "message": "The tutor is taking a short break. Please try again in a moment.",
            })),
        },
    );
    breakers.insert(
        SUPABASE.to_string(),
        CircuitBreakerConfig {
            failure_threshold: 10,
            reset_timeout_secs: 15,
            monitoring_period_secs: 60,
            success_threshold: 5,
            half_open_max_calls: None,
            fallback: Some(serde_json::json!({
                "degraded": true,
                "error": "Database temporarily unavailable",
                "message": "Your progress could not be loaded right now. Please try again shortly.",
                "data": null,
            })),
        },
    );
    breakers.insert(EXTERNAL.to_string(), CircuitBreakerConfig::default());
    breakers
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on one protected operation, retries included, in seconds.
    pub operation_secs: u64,

    /// Bound on an ops-server request in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation_secs: 30,
            request_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoints configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Shipped placeholder; validation refuses it when admin is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
        }
    }
}
