//! Protection middleware: rate limit, then circuit breaker, then retry.
//!
//! # Responsibilities
//! - Compose the rate limiter, breakers and retry policy around one operation
//! - Offer a typed entry point (`run`) and an HTTP one (`protect`)
//! - Own no state of its own; everything lives in the injected components
//!
//! # Data Flow
//! ```text
//! identity + ProtectionProfile + operation
//!     → RateLimiter::check_limit (reject → RATE_LIMITED, operation untouched)
//!     → CircuitBreaker::execute (open → fallback or CIRCUIT_BREAKER_OPEN)
//!         → RetryPolicy::execute_until (bounded by the operation timeout)
//!     → Guarded { outcome, rate_limit }
//!     → protect: response + X-RateLimit-* headers, or classify(error)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::{IntoResponse, Response};

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::ShieldConfig;
use crate::error::ShieldError;
use crate::http::request::RequestIdentity;
use crate::http::response::{apply_rate_limit_headers, classify, degraded};
use crate::observability::metrics;
use crate::rate_limit::{RateLimitClass, RateLimitResult, RateLimiter};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{CircuitBreakerRegistry, Outcome, RetryPolicy};

/// How one kind of call is protected.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionProfile {
    pub rate_limit_class: RateLimitClass,
    pub circuit_breaker: Option<String>,
    pub retry: Option<RetryPolicy>,
}

impl ProtectionProfile {
    pub fn new(rate_limit_class: RateLimitClass) -> Self {
        Self {
            rate_limit_class,
            circuit_breaker: None,
            retry: None,
        }
    }

    pub fn with_circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// A successful protected call and the rate-limit decision that admitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub outcome: Outcome<T>,
    pub rate_limit: RateLimitResult,
}

#[derive(Clone)]
pub struct Shield {
    inner: Arc<ShieldInner>,
}

struct ShieldInner {
    cache: CacheStore,
    limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    default_retry: RetryPolicy,
    operation_timeout: Duration,
}

impl Shield {
    pub fn new(
        cache: CacheStore,
        limiter: RateLimiter,
        breakers: CircuitBreakerRegistry,
        default_retry: RetryPolicy,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ShieldInner {
                cache,
                limiter,
                breakers,
                default_retry,
                operation_timeout,
            }),
        }
    }

    /// Wire every component from configuration around an already-selected cache.
    pub fn from_config(config: &ShieldConfig, cache: CacheStore, clock: Arc<dyn Clock>) -> Self {
        let limiter = RateLimiter::select(&cache, &config.rate_limit, clock.clone());
        let operation_timeout = Duration::from_secs(config.timeouts.operation_secs);
        let breakers = CircuitBreakerRegistry::from_config(
            &config.circuit_breakers,
            &cache,
            clock,
            operation_timeout,
        );
        Self::new(
            cache,
            limiter,
            breakers,
            RetryPolicy::from(&config.retries),
            operation_timeout,
        )
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.inner.breakers
    }

    /// The configured retry policy, for profiles that want one.
    pub fn default_retry(&self) -> RetryPolicy {
        self.inner.default_retry
    }

    pub async fn check_limit(&self, identity: &RequestIdentity, class: RateLimitClass) -> RateLimitResult {
        self.inner
            .limiter
            .check_limit(identity.identifier_for(class), class)
            .await
    }

    /// Typed entry point for callers that are not HTTP handlers.
    pub async fn run<T, F, Fut>(
        &self,
        identity: &RequestIdentity,
        profile: &ProtectionProfile,
        op: F,
    ) -> Result<Guarded<T>, ShieldError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ShieldError>>,
    {
        let start = Instant::now();
        let class = profile.rate_limit_class;

        let rate_limit = self.check_limit(identity, class).await;
        if !rate_limit.allowed {
            metrics::record_request(class, "rate_limited", start);
            return Err(ShieldError::RateLimited(rate_limit));
        }

        let result = self.call(profile, op).await;
        let label = match &result {
            Ok(Outcome::Executed(_)) => "ok",
            Ok(Outcome::Fallback(_)) => "degraded",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_request(class, label, start);

        result.map(|outcome| Guarded {
            outcome,
            rate_limit,
        })
    }

    /// Run `op` through the profile's breaker and retry policy, bounded by
    /// the operation timeout. Performs no rate-limit check.
    pub async fn call<T, F, Fut>(&self, profile: &ProtectionProfile, mut op: F) -> Result<Outcome<T>, ShieldError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ShieldError>>,
    {
        let retry = &profile.retry.unwrap_or_else(RetryPolicy::none);
        let timeout = self.inner.operation_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let op = &mut op;

        match &profile.circuit_breaker {
            Some(name) => {
                let breaker = self.inner.breakers.get(name).ok_or_else(|| {
                    tracing::error!(service = %name, "Unknown circuit breaker in protection profile");
                    ShieldError::operation(format!("unknown circuit breaker: {}", name))
                })?;
                breaker
                    .execute(move || retry.execute_until(deadline, op))
                    .await
            }
            None => with_timeout(timeout, retry.execute_until(deadline, op))
                .await
                .map(Outcome::Executed),
        }
    }

    /// HTTP entry point: the operation's response with rate-limit headers,
    /// a degraded fallback, or the classified error.
    pub async fn protect<T, F, Fut>(
        &self,
        identity: &RequestIdentity,
        profile: &ProtectionProfile,
        op: F,
    ) -> Response
    where
        T: IntoResponse,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ShieldError>>,
    {
        match self.run(identity, profile, op).await {
            Ok(Guarded { outcome, rate_limit }) => {
                let mut response = match outcome {
                    Outcome::Executed(value) => value.into_response(),
                    Outcome::Fallback(payload) => degraded(payload),
                };
                apply_rate_limit_headers(response.headers_mut(), &rate_limit);
                response
            }
            Err(e) => {
                match &e {
                    ShieldError::RateLimited(_) => {}
                    other => tracing::warn!(
                        class = %profile.rate_limit_class,
                        circuit = profile.circuit_breaker.as_deref().unwrap_or("none"),
                        kind = %other.kind(),
                        error = %other,
                        "Protected operation failed"
                    ),
                }
                classify(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resilience::circuit_breaker::SUPABASE;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn shield(clock: Arc<ManualClock>) -> Shield {
        let cache = CacheStore::in_memory(clock.clone(), "edu");
        Shield::from_config(&ShieldConfig::default(), cache, clock)
    }

    #[tokio::test]
    async fn test_rejection_skips_operation() {
        let shield = shield(ManualClock::new(0));
        let identity = RequestIdentity::principal("learner-1");
        let profile = ProtectionProfile::new(RateLimitClass::BulkOperations);
        let calls = AtomicU32::new(0);

        for _ in 0..6 {
            let _ = shield
                .run(&identity, &profile, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_burst_counts_once_against_breaker() {
        let shield = shield(ManualClock::new(0));
        let identity = RequestIdentity::principal("learner-1");
        let profile = ProtectionProfile::new(RateLimitClass::DatabaseWrites)
            .with_circuit_breaker(SUPABASE)
            .with_retry(RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 3));
        let calls = AtomicU32::new(0);

        let result: Result<Guarded<()>, ShieldError> = shield
            .run(&identity, &profile, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ShieldError::connection("pool exhausted"))
            })
            .await;

        assert!(matches!(result, Err(ShieldError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let breaker = shield.breakers().get(SUPABASE).unwrap();
        let status = breaker.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_without_breaker() {
        let shield = shield(ManualClock::new(0));
        let identity = RequestIdentity::principal("learner-1");
        let profile = ProtectionProfile::new(RateLimitClass::General);

        let result: Result<Guarded<()>, ShieldError> = shield
            .run(&identity, &profile, || async {
                tokio::time::sleep(Duration::from_secs(45)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ShieldError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unknown_breaker_is_internal_error() {
        let shield = shield(ManualClock::new(0));
        let identity = RequestIdentity::principal("learner-1");
        let profile = ProtectionProfile::new(RateLimitClass::General).with_circuit_breaker("nope");

        let result: Result<Guarded<()>, ShieldError> =
            shield.run(&identity, &profile, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ShieldError::Operation(_))));
    }

    #[tokio::test]
    async fn test_success_carries_rate_limit_decision() {
        let shield = shield(ManualClock::new(0));
        let identity = RequestIdentity::principal("learner-1");
        let profile = ProtectionProfile::new(RateLimitClass::AiOperations);

        let guarded = shield
            .run(&identity, &profile, || async { Ok("hola") })
            .await
            .unwrap();
        assert_eq!(guarded.outcome, Outcome::Executed("hola"));
        assert_eq!(guarded.rate_limit.remaining, 19);
        assert_eq!(guarded.rate_limit.limit, 20);
    }
}
