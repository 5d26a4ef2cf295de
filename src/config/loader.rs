//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ShieldConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_VAR: &str = "EDU_SHIELD_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<ShieldConfig, ConfigError> {
    let config: ShieldConfig = toml::from_str(content)?;
    Ok(config.with_builtin_breakers())
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ShieldConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Startup entry point: optional file, then environment overrides, then validation.
///
/// A `.env` file in the working directory is loaded first if present.
pub fn load() -> Result<ShieldConfig, ConfigError> {
    dotenv::dotenv().ok();

    let config = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) if !path.trim().is_empty() => {
            let content = fs::read_to_string(path.trim())?;
            parse_config(&content)?
        }
        _ => ShieldConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment-style settings on top of a parsed config.
pub fn apply_env_overrides<F>(mut config: ShieldConfig, lookup: F) -> ShieldConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("REDIS_URL") {
        config.cache.redis_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
        config.cache.key_prefix = prefix;
    }
    if let Some(addr) = lookup("SHIELD_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(key) = lookup("SHIELD_ADMIN_API_KEY") {
        config.admin.enabled = true;
        config.admin.api_key = key;
    }
    if let Some(level) = lookup("SHIELD_LOG_LEVEL") {
        config.observability.log_level = level;
    }
    config
}
