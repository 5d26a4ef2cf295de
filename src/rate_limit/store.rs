//! Cache-backed fixed-window limiter.
//!
//! # Responsibilities
//! - Keep one counter record per `class:identifier:windowStart`
//! - Expire each record when its window ends
//! - Fail open when the cache cannot be read or written
//!
//! # Design Decisions
//! - Read-then-write, not atomic increment: a small overshoot under races is accepted
//! - Uses the `try_*` cache calls so failures are visible here and counted

use std::sync::Arc;
use std::time::Duration;

use crate::cache::keys;
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::observability::metrics;
use crate::rate_limit::{
    counter_key, evaluate, fail_open, window_for, RateLimitClass, RateLimitCounter,
    RateLimitResult, RateLimitRules,
};

pub struct StoreRateLimiter {
    cache: CacheStore,
    rules: Arc<RateLimitRules>,
    clock: Arc<dyn Clock>,
}

impl StoreRateLimiter {
    pub fn new(cache: CacheStore, rules: Arc<RateLimitRules>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, rules, clock }
    }

    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    pub async fn check_limit(&self, identifier: &str, class: RateLimitClass) -> RateLimitResult {
        let rule = self.rules.get(class);
        let now = self.clock.now_millis();
        let window = window_for(now, rule.window_ms);
        let key = counter_key(class, identifier, window);

        let current = match self
            .cache
            .try_get::<RateLimitCounter>(keys::RATE_LIMIT, &key)
            .await
        {
            Ok(Some(counter)) if counter.window_start == window.start => counter.count,
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(class = %class, error = %e, "Rate limit store unreadable, allowing request");
                metrics::record_rate_limit_fail_open(class);
                return fail_open(rule, window, now);
            }
        };

        let result = evaluate(current, rule, window, now);
        if !result.allowed {
            return result;
        }

        let counter = RateLimitCounter {
            identifier: identifier.to_string(),
            window_start: window.start,
            count: result.total_hits,
            limit: rule.max_requests,
            window_ms: rule.window_ms,
        };
        let ttl = Duration::from_millis(window.end - now);

        if let Err(e) = self
            .cache
            .try_set(keys::RATE_LIMIT, &key, &counter, ttl)
            .await
        {
            tracing::warn!(class = %class, error = %e, "Rate limit store unwritable, allowing request");
            metrics::record_rate_limit_fail_open(class);
        }

        result
    }
}
