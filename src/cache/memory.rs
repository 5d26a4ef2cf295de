//! In-process cache backend.
//!
//! Used when no durable store is configured or reachable. State lives only
//! as long as the process and is not shared with other instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::{keys, BackendKind, CacheBackend, CacheError};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// Epoch millis; the entry is dead from this instant on.
    expires_at: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// `DashMap`-backed store with lazy expiry and an optional entry cap.
pub struct InMemoryBackend {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
}

impl InMemoryBackend {
    pub fn new(clock: Arc<dyn Clock>, max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries,
        }
    }

    /// Number of physically present entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Over the cap: purge expired entries, then evict the soonest-expiring
    /// ones down to the low-water mark so the scan is paid once per batch.
    fn enforce_capacity(&self, max: usize) {
        if self.entries.len() <= max {
            return;
        }
        self.purge_expired();

        let target = low_water_mark(max);
        let excess = self.entries.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut by_expiry: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().expires_at, e.key().clone()))
            .collect();
        if excess < by_expiry.len() {
            by_expiry.select_nth_unstable(excess - 1);
        }

        for (_, key) in by_expiry.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        tracing::debug!(evicted = excess, max, target, "In-memory cache over capacity");
    }
}

/// Eviction target for a cap: 90% of it, never below one entry.
fn low_water_mark(max: usize) -> usize {
    (max - max / 10).max(1)
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_millis();
        // Clone out before removing: holding a shard ref across `remove` deadlocks.
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.is_expired(now)));

        match hit {
            Some((value, false)) => Ok(Some(value)),
            Some((_, true)) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = self.clock.now_millis().saturating_add(ttl.as_millis() as u64);
        self.entries.insert(key.to_string(), CacheEntry { value, expires_at });

        if let Some(max) = self.max_entries {
            self.enforce_capacity(max);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|e| keys::glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0u64;
        for key in matching {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
