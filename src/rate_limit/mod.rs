//! Fixed-window rate limiting.
//!
//! # Data Flow
//! ```text
//! (identifier, class)
//!     → RateLimitRules (built-in rule, possibly overridden by config)
//!     → window_for(now) (aligned window start / end)
//!     → store.rs  (counter in the shared cache, survives restarts)
//!       or local.rs (counter in process memory)
//!     → RateLimitResult (allowed, remaining, reset time)
//! ```
//!
//! # Design Decisions
//! - Windows are aligned to multiples of the window length, not to the first hit
//! - A rejected check does not increment the counter
//! - The variant is chosen from the cache backend kind at startup
//! - Store failures fail open; an outage must not lock learners out

pub mod local;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{BackendKind, CacheStore};
use crate::clock::Clock;
use crate::config::RateLimitConfig;

pub use local::LocalRateLimiter;
pub use store::StoreRateLimiter;

/// Endpoint classes, each with its own window and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitClass {
    General,
    AiOperations,
    DatabaseWrites,
    BulkOperations,
    /// Per-IP ceiling across every class.
    Global,
}

impl RateLimitClass {
    pub const ALL: [RateLimitClass; 5] = [
        RateLimitClass::General,
        RateLimitClass::AiOperations,
        RateLimitClass::DatabaseWrites,
        RateLimitClass::BulkOperations,
        RateLimitClass::Global,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitClass::General => "general",
            RateLimitClass::AiOperations => "aiOperations",
            RateLimitClass::DatabaseWrites => "databaseWrites",
            RateLimitClass::BulkOperations => "bulkOperations",
            RateLimitClass::Global => "global",
        }
    }

    pub fn default_rule(self) -> RateLimitRule {
        match self {
            RateLimitClass::General => RateLimitRule::new(60_000, 100),
            RateLimitClass::AiOperations => RateLimitRule::new(60_000, 20),
            RateLimitClass::DatabaseWrites => RateLimitRule::new(60_000, 50),
            RateLimitClass::BulkOperations => RateLimitRule::new(300_000, 5),
            RateLimitClass::Global => RateLimitRule::new(60_000, 300),
        }
    }

    /// The global class is always keyed by client IP, never by principal.
    pub fn keyed_by_ip(self) -> bool {
        matches!(self, RateLimitClass::Global)
    }
}

impl fmt::Display for RateLimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitRule {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }
}

/// Effective rule table: built-ins with config overrides applied.
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    rules: HashMap<RateLimitClass, RateLimitRule>,
}

impl RateLimitRules {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut rules: HashMap<_, _> = RateLimitClass::ALL
            .iter()
            .map(|class| (*class, class.default_rule()))
            .collect();

        for (class, rule) in &config.overrides {
            rules.insert(
                *class,
                RateLimitRule::new(rule.window_secs.saturating_mul(1_000), rule.max_requests),
            );
        }

        Self { rules }
    }

    pub fn get(&self, class: RateLimitClass) -> RateLimitRule {
        self.rules
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_rule())
    }
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Window end, epoch milliseconds.
    pub reset_time: u64,
    /// Requests seen in the window, this one included.
    pub total_hits: u32,
    /// Whole seconds until the window resets, at least 1.
    pub retry_after_secs: u64,
}

/// Counter record as persisted per `class:identifier:windowStart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub identifier: String,
    pub window_start: u64,
    pub count: u32,
    pub limit: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub start: u64,
    pub end: u64,
}

pub(crate) fn window_for(now: u64, window_ms: u64) -> Window {
    let window_ms = window_ms.max(1);
    let start = now / window_ms * window_ms;
    Window {
        start,
        end: start + window_ms,
    }
}

/// Decide a check given the count already recorded in the window.
pub(crate) fn evaluate(current: u32, rule: RateLimitRule, window: Window, now: u64) -> RateLimitResult {
    let hits = current.saturating_add(1);
    let allowed = hits <= rule.max_requests;
    RateLimitResult {
        allowed,
        limit: rule.max_requests,
        remaining: if allowed { rule.max_requests - hits } else { 0 },
        reset_time: window.end,
        total_hits: hits,
        retry_after_secs: window.end.saturating_sub(now).div_ceil(1_000).max(1),
    }
}

/// Result returned when the counter store cannot be consulted.
pub(crate) fn fail_open(rule: RateLimitRule, window: Window, now: u64) -> RateLimitResult {
    RateLimitResult {
        allowed: true,
        limit: rule.max_requests,
        remaining: rule.max_requests,
        reset_time: window.end,
        total_hits: 0,
        retry_after_secs: window.end.saturating_sub(now).div_ceil(1_000).max(1),
    }
}

pub(crate) fn counter_key(class: RateLimitClass, identifier: &str, window: Window) -> String {
    format!("{}:{}:{}", class, identifier, window.start)
}

/// The limiter variant in force for this process.
pub enum RateLimiter {
    /// Counters live in the durable cache and are shared across instances.
    Shared(StoreRateLimiter),
    /// Counters live in this process only.
    Local(LocalRateLimiter),
}

impl RateLimiter {
    /// Durable cache → shared counters; in-memory cache → local counters.
    pub fn select(cache: &CacheStore, config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let rules = Arc::new(RateLimitRules::from_config(config));
        match cache.kind() {
            BackendKind::Durable => {
                RateLimiter::Shared(StoreRateLimiter::new(cache.clone(), rules, clock))
            }
            BackendKind::InMemory => RateLimiter::Local(LocalRateLimiter::new(
                rules,
                clock,
                config.cleanup_probability,
            )),
        }
    }

    pub async fn check_limit(&self, identifier: &str, class: RateLimitClass) -> RateLimitResult {
        let result = match self {
            RateLimiter::Shared(limiter) => limiter.check_limit(identifier, class).await,
            RateLimiter::Local(limiter) => limiter.check_limit(identifier, class),
        };

        if !result.allowed {
            tracing::debug!(
                identifier,
                class = %class,
                total_hits = result.total_hits,
                "Rate limit exceeded"
            );
            crate::observability::metrics::record_rate_limited(class);
        }
        result
    }

    pub fn rule(&self, class: RateLimitClass) -> RateLimitRule {
        match self {
            RateLimiter::Shared(limiter) => limiter.rules().get(class),
            RateLimiter::Local(limiter) => limiter.rules().get(class),
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            RateLimiter::Shared(_) => "shared",
            RateLimiter::Local(_) => "local",
        }
    }
}
