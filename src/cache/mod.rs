//! Namespaced cache store.
//!
//! # Data Flow
//! ```text
//! caller (rate limiter, circuit breaker, domain cache)
//!     → CacheStore (namespacing, JSON encoding, error policy)
//!     → CacheBackend
//!         → durable.rs (Redis, shared across processes)
//!         → memory.rs  (DashMap, this process only)
//! ```
//!
//! # Design Decisions
//! - Backend chosen once at startup and injected, never looked up globally
//! - Contract operations never surface store errors: log and degrade
//! - `try_*` twins expose `CacheError` for callers with their own policy
//! - Expired entries are never returned, even if still physically present

pub mod durable;
pub mod keys;
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::observability::metrics;

pub use durable::RedisBackend;
pub use memory::InMemoryBackend;

/// Store-side failures. Never a programming error.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache command timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("cache value could not be encoded: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
        {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Which backend the process selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "durable")]
    Durable,
    #[serde(rename = "in-memory")]
    InMemory,
}

/// Result of `CacheStore::health_check`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub backend: BackendKind,
    pub healthy: bool,
}

/// Raw key/value operations over physical keys.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob over physical keys. Returns the count removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Namespaced, best-effort cache shared by all protection components.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    prefix: Arc<str>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: Arc::from(prefix.into()),
        }
    }

    /// In-process store with no entry cap.
    pub fn in_memory(clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemoryBackend::new(clock, None)), prefix)
    }

    /// Select the backend for this process.
    ///
    /// A configured Redis URL is used only if the client connects and answers
    /// a ping within the command timeout; anything else falls back to memory.
    pub async fn connect(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let timeout = Duration::from_millis(config.command_timeout_ms);
        let url = config.redis_url.as_deref().map(str::trim).filter(|u| !u.is_empty());

        if let Some(url) = url {
            match RedisBackend::connect(url, timeout).await {
                Ok(backend) => {
                    tracing::info!(prefix = %config.key_prefix, "Using durable cache backend");
                    return Self::new(Arc::new(backend), config.key_prefix.clone());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Durable cache unavailable, falling back to in-memory store");
                }
            }
        } else {
            tracing::info!("No durable cache configured, using in-memory store");
        }

        let backend = InMemoryBackend::new(clock, config.max_memory_entries);
        Self::new(Arc::new(backend), config.key_prefix.clone())
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, namespace: &str, key: &str) -> String {
        keys::compose(&self.prefix, namespace, key)
    }

    pub async fn try_get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.backend.get(&self.key(namespace, key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(&self.key(namespace, key), raw, ttl).await
    }

    /// Read a value; any store failure reads as a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        match self.try_get(namespace, key).await {
            Ok(value) => value,
            Err(e) => {
                degrade("get", namespace, &e);
                None
            }
        }
    }

    /// Write a value with a time-to-live; failures are logged and dropped.
    pub async fn set<T: Serialize + ?Sized>(&self, namespace: &str, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.try_set(namespace, key, value, ttl).await {
            degrade("set", namespace, &e);
        }
    }

    pub async fn delete(&self, namespace: &str, key: &str) {
        if let Err(e) = self.backend.delete(&self.key(namespace, key)).await {
            degrade("delete", namespace, &e);
        }
    }

    /// Delete keys in `namespace` whose key part matches `pattern`.
    ///
    /// The prefix and namespace are matched literally; only `pattern` is a glob.
    pub async fn delete_pattern(&self, namespace: &str, pattern: &str) -> u64 {
        let physical = keys::compose_pattern(&self.prefix, namespace, pattern);
        match self.backend.delete_pattern(&physical).await {
            Ok(removed) => removed,
            Err(e) => {
                degrade("delete_pattern", namespace, &e);
                0
            }
        }
    }

    pub async fn health_check(&self) -> CacheHealth {
        let healthy = match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Cache health check failed");
                false
            }
        };
        CacheHealth {
            backend: self.kind(),
            healthy,
        }
    }

    /// Read-through helper for domain caches.
    ///
    /// Misses and store failures run `fetch`; a fetched value is written back
    /// best-effort. Errors from `fetch` are returned as-is and never cached.
    pub async fn remember<T, E, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(namespace, key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set(namespace, key, &value, ttl).await;
        Ok(value)
    }
}

fn degrade(op: &'static str, namespace: &str, err: &CacheError) {
    tracing::warn!(op, namespace, error = %err, "Cache operation failed, degrading");
    metrics::record_cache_error(op);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Backend that fails every call, for exercising degrade paths.

    use super::*;

    pub struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Durable
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn delete_pattern(&self, _pattern: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    pub fn failing_store() -> CacheStore {
        CacheStore::new(Arc::new(FailingBackend), "test")
    }
}
