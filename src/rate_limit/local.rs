//! In-process fixed-window limiter.
//!
//! Used when the cache is the in-memory fallback: counters would not be
//! shared across instances anyway, so they stay in a plain map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::Clock;
use crate::observability::metrics;
use crate::rate_limit::{
    counter_key, evaluate, window_for, RateLimitClass, RateLimitCounter, RateLimitResult,
    RateLimitRules,
};

pub struct LocalRateLimiter {
    windows: Mutex<HashMap<String, RateLimitCounter>>,
    rules: Arc<RateLimitRules>,
    clock: Arc<dyn Clock>,
    cleanup_probability: f64,
}

impl LocalRateLimiter {
    pub fn new(rules: Arc<RateLimitRules>, clock: Arc<dyn Clock>, cleanup_probability: f64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            rules,
            clock,
            cleanup_probability: cleanup_probability.clamp(0.0, 1.0),
        }
    }

    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }

    pub fn check_limit(&self, identifier: &str, class: RateLimitClass) -> RateLimitResult {
        let rule = self.rules.get(class);
        let now = self.clock.now_millis();
        let window = window_for(now, rule.window_ms);
        let key = counter_key(class, identifier, window);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if self.cleanup_probability > 0.0 && fastrand::f64() < self.cleanup_probability {
            windows.retain(|_, c| c.window_start + c.window_ms > now);
            metrics::record_local_windows(windows.len());
        }

        let current = windows.get(&key).map(|c| c.count).unwrap_or(0);
        let result = evaluate(current, rule, window, now);
        if result.allowed {
            let counter = windows.entry(key).or_insert_with(|| RateLimitCounter {
                identifier: identifier.to_string(),
                window_start: window.start,
                count: 0,
                limit: rule.max_requests,
                window_ms: rule.window_ms,
            });
            counter.count = result.total_hits;
        }
        result
    }

    /// Number of windows currently held, expired ones included until swept.
    pub fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
