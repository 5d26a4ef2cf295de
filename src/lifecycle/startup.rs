//! Startup orchestration.
//!
//! # Responsibilities
//! - Select the cache backend (durable if reachable, else in-memory)
//! - Build the shield in dependency order: cache → limiter → breakers

use std::time::Duration;

use crate::cache::CacheStore;
use crate::clock;
use crate::config::ShieldConfig;
use crate::shield::Shield;

/// Connect the cache and wire every protection component around it.
pub async fn build_shield(config: &ShieldConfig) -> Shield {
    let clock = clock::system();
    let cache = CacheStore::connect(&config.cache, clock.clone()).await;

    let shield = Shield::from_config(config, cache, clock);

    tracing::info!(
        cache = ?shield.cache().kind(),
        rate_limiter = shield.limiter().variant(),
        circuit_breakers = shield.breakers().len(),
        operation_timeout = ?Duration::from_secs(config.timeouts.operation_secs),
        "Shield initialised"
    );
    shield
}
