//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0, probabilities in [0, 1])
//! - Refuse unsafe admin settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ShieldConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }

    if config.cache.key_prefix.chars().any(char::is_whitespace) {
        errors.push(ValidationError::new("cache.key_prefix", "must not contain whitespace"));
    }
    if config.cache.command_timeout_ms == 0 {
        errors.push(ValidationError::new("cache.command_timeout_ms", "must be > 0"));
    }
    if config.cache.max_memory_entries == Some(0) {
        errors.push(ValidationError::new("cache.max_memory_entries", "must be > 0 when set"));
    }

    let p = config.rate_limit.cleanup_probability;
    if !(0.0..=1.0).contains(&p) {
        errors.push(ValidationError::new("rate_limit.cleanup_probability", "must be within [0, 1]"));
    }
    for (class, rule) in &config.rate_limit.overrides {
        if rule.window_secs == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.overrides.{}.window_secs", class),
                "must be > 0",
            ));
        }
        if rule.max_requests == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.overrides.{}.max_requests", class),
                "must be > 0",
            ));
        }
    }

    for (name, breaker) in &config.circuit_breakers {
        let field = |f: &str| format!("circuit_breakers.{}.{}", name, f);
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(field("failure_threshold"), "must be > 0"));
        }
        if breaker.success_threshold == 0 {
            errors.push(ValidationError::new(field("success_threshold"), "must be > 0"));
        }
        if breaker.reset_timeout_secs == 0 {
            errors.push(ValidationError::new(field("reset_timeout_secs"), "must be > 0"));
        }
        if breaker.monitoring_period_secs == 0 {
            errors.push(ValidationError::new(field("monitoring_period_secs"), "must be > 0"));
        }
        if breaker.half_open_max_calls == Some(0) {
            errors.push(ValidationError::new(field("half_open_max_calls"), "must be > 0 when set"));
        }
    }

    if config.retries.base_delay_ms == 0 {
        errors.push(ValidationError::new("retries.base_delay_ms", "must be > 0"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new("retries.max_delay_ms", "must be >= base_delay_ms"));
    }

    if config.timeouts.operation_secs == 0 {
        errors.push(ValidationError::new("timeouts.operation_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
        } else if config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "placeholder key must be replaced"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
