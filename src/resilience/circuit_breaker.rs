//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast or get the fallback
//! - Half-Open: a limited number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within the monitoring period
//! Open → Half-Open: first call after next_attempt_time (checked lazily)
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - Per-service breaker (not global), state persisted in the cache store
//! - Fail fast in Open state; the operation is never invoked
//! - Read-modify-write serialised per breaker within the process only
//! - Concurrent half-open trials bounded per process by an RAII guard
//! - Every call carries a timeout that counts as a failure

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cache::keys;
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::error::ShieldError;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;

pub const AZURE_OPENAI: &str = "azureOpenAI";
pub const SUPABASE: &str = "supabase";
pub const EXTERNAL: &str = "external";

/// Kept past the reset timeout so an idle open breaker is still remembered.
const STATE_TTL_GRACE: Duration = Duration::from_secs(300);

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Persisted breaker record, one per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<u64>,
    pub next_attempt_time: Option<u64>,
}

impl CircuitBreakerState {
    fn closed(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }
}

/// Resolved breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
    pub fallback: Option<serde_json::Value>,
    pub call_timeout: Duration,
}

impl BreakerSettings {
    pub fn from_config(config: &CircuitBreakerConfig, call_timeout: Duration) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            monitoring_period: Duration::from_secs(config.monitoring_period_secs),
            success_threshold: config.success_threshold.max(1),
            half_open_max_calls: config
                .half_open_max_calls
                .unwrap_or(config.success_threshold)
                .max(1),
            fallback: config.fallback.clone(),
            call_timeout,
        }
    }
}

/// What `execute` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The operation ran and succeeded.
    Executed(T),
    /// The circuit was open and a degraded payload was served instead.
    Fallback(serde_json::Value),
}

impl<T> Outcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Fallback(_))
    }

    pub fn executed(self) -> Option<T> {
        match self {
            Outcome::Executed(value) => Some(value),
            Outcome::Fallback(_) => None,
        }
    }
}

enum Admission<'a> {
    Closed,
    Trial(TrialGuard<'a>),
    Rejected { retry_after_secs: u64 },
}

/// Holds one half-open trial slot; releases it on drop.
struct TrialGuard<'a> {
    trials: &'a AtomicU32,
}

impl<'a> TrialGuard<'a> {
    fn try_acquire(trials: &'a AtomicU32, max: u32) -> Option<Self> {
        let mut prev = trials.load(Ordering::Relaxed);
        loop {
            if prev >= max {
                return None;
            }
            match trials.compare_exchange_weak(prev, prev + 1, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return Some(Self { trials }),
                Err(x) => prev = x,
            }
        }
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.trials.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    cache: CacheStore,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
    trials: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        settings: BreakerSettings,
        cache: CacheStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            cache,
            clock,
            lock: Mutex::new(()),
            trials: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Run `op` through the breaker.
    ///
    /// While open the operation is not invoked: the fallback is returned if
    /// one is registered, otherwise `ShieldError::CircuitOpen`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<Outcome<T>, ShieldError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ShieldError>>,
    {
        let trial = match self.admit().await {
            Admission::Closed => None,
            Admission::Trial(guard) => Some(guard),
            Admission::Rejected { retry_after_secs } => return self.reject(retry_after_secs),
        };

        match with_timeout(self.settings.call_timeout, op()).await {
            Ok(value) => {
                self.on_success(trial.is_some()).await;
                Ok(Outcome::Executed(value))
            }
            Err(e) => {
                self.on_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Current persisted state; an absent record reads as closed.
    pub async fn get_status(&self) -> CircuitBreakerState {
        self.load().await
    }

    /// Force the breaker closed with zeroed counters.
    pub async fn reset(&self) {
        let _lock = self.lock.lock().await;
        let previous = self.load().await.state;
        self.store(&CircuitBreakerState::closed(&self.name)).await;
        tracing::info!(service = %self.name, from = previous.as_str(), "Circuit breaker reset");
        if previous != CircuitState::Closed {
            metrics::record_breaker_transition(&self.name, CircuitState::Closed);
        }
    }

    /// Reads without the lock; only the lazy OPEN → HALF_OPEN write takes it.
    async fn admit(&self) -> Admission<'_> {
        let now = self.clock.now_millis();
        let mut state = self.load().await;

        if state.state == CircuitState::Open && open_elapsed(&state, now) {
            let _lock = self.lock.lock().await;
            state = self.load().await;
            if state.state == CircuitState::Open && open_elapsed(&state, now) {
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                self.store(&state).await;
                self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
            }
        }

        match state.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => Admission::Rejected {
                retry_after_secs: state
                    .next_attempt_time
                    .map_or(1, |next| next.saturating_sub(now).div_ceil(1_000).max(1)),
            },
            CircuitState::HalfOpen => {
                match TrialGuard::try_acquire(&self.trials, self.settings.half_open_max_calls) {
                    Some(guard) => Admission::Trial(guard),
                    None => Admission::Rejected { retry_after_secs: 1 },
                }
            }
        }
    }

    fn reject<T>(&self, retry_after_secs: u64) -> Result<Outcome<T>, ShieldError> {
        metrics::record_breaker_rejected(&self.name);
        match &self.settings.fallback {
            Some(fallback) => {
                tracing::debug!(service = %self.name, "Circuit open, serving fallback");
                Ok(Outcome::Fallback(fallback.clone()))
            }
            None => Err(ShieldError::CircuitOpen {
                service: self.name.clone(),
                retry_after_secs,
            }),
        }
    }

    /// Only trial calls count toward closing a half-open breaker; a call
    /// admitted while closed may finish after the breaker has tripped.
    async fn on_success(&self, as_trial: bool) {
        if !success_changes_state(&self.load().await, as_trial) {
            return;
        }

        let _lock = self.lock.lock().await;
        let mut state = self.load().await;

        match state.state {
            CircuitState::HalfOpen if as_trial => {
                state.success_count += 1;
                if state.success_count >= self.settings.success_threshold {
                    state = CircuitBreakerState::closed(&self.name);
                    self.transitioned(CircuitState::HalfOpen, CircuitState::Closed);
                }
                self.store(&state).await;
            }
            CircuitState::Closed if state.failure_count > 0 => {
                state.failure_count = 0;
                state.last_failure_time = None;
                self.store(&state).await;
            }
            // Changed by another call between the two reads.
            _ => {}
        }
    }

    async fn on_failure(&self, err: &ShieldError) {
        let _lock = self.lock.lock().await;
        let mut state = self.load().await;
        let now = self.clock.now_millis();

        tracing::debug!(service = %self.name, error = %err, state = state.state.as_str(), "Protected call failed");

        match state.state {
            CircuitState::HalfOpen => {
                self.trip(&mut state, now);
                self.transitioned(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Closed => {
                let window = self.settings.monitoring_period.as_millis() as u64;
                let stale = state
                    .last_failure_time
                    .is_some_and(|last| now.saturating_sub(last) > window);

                state.failure_count = if stale { 1 } else { state.failure_count + 1 };
                state.last_failure_time = Some(now);

                if state.failure_count >= self.settings.failure_threshold {
                    self.trip(&mut state, now);
                    self.transitioned(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::Open => {
                state.last_failure_time = Some(now);
            }
        }

        self.store(&state).await;
    }

    fn trip(&self, state: &mut CircuitBreakerState, now: u64) {
        state.state = CircuitState::Open;
        state.success_count = 0;
        state.last_failure_time = Some(now);
        state.next_attempt_time = Some(now + self.settings.reset_timeout.as_millis() as u64);
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        if to == CircuitState::Open {
            tracing::warn!(service = %self.name, from = from.as_str(), to = to.as_str(), "Circuit breaker state change");
        } else {
            tracing::info!(service = %self.name, from = from.as_str(), to = to.as_str(), "Circuit breaker state change");
        }
        metrics::record_breaker_transition(&self.name, to);
    }

    async fn load(&self) -> CircuitBreakerState {
        self.cache
            .get::<CircuitBreakerState>(keys::CIRCUIT_BREAKER, &self.name)
            .await
            .unwrap_or_else(|| CircuitBreakerState::closed(&self.name))
    }

    async fn store(&self, state: &CircuitBreakerState) {
        let ttl = self.settings.reset_timeout + STATE_TTL_GRACE;
        self.cache
            .set(keys::CIRCUIT_BREAKER, &self.name, state, ttl)
            .await;
    }
}

fn open_elapsed(state: &CircuitBreakerState, now: u64) -> bool {
    !state.next_attempt_time.is_some_and(|next| now < next)
}

fn success_changes_state(state: &CircuitBreakerState, as_trial: bool) -> bool {
    match state.state {
        CircuitState::HalfOpen => as_trial,
        CircuitState::Closed => state.failure_count > 0,
        CircuitState::Open => false,
    }
}

/// Every configured breaker, by service name.
pub struct CircuitBreakerRegistry {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn from_config(
        configs: &BTreeMap<String, CircuitBreakerConfig>,
        cache: &CacheStore,
        clock: Arc<dyn Clock>,
        call_timeout: Duration,
    ) -> Self {
        let breakers = configs
            .iter()
            .map(|(name, config)| {
                let breaker = CircuitBreaker::new(
                    name.clone(),
                    BreakerSettings::from_config(config, call_timeout),
                    cache.clone(),
                    clock.clone(),
                );
                (name.clone(), Arc::new(breaker))
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CircuitBreaker>> {
        self.breakers.values()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::schema::builtin_circuit_breakers;

    fn breaker(name: &str, clock: Arc<ManualClock>) -> CircuitBreaker {
        let configs = builtin_circuit_breakers();
        let cache = CacheStore::in_memory(clock.clone(), "edu");
        CircuitBreaker::new(
            name,
            BreakerSettings::from_config(&configs[name], DEFAULT_CALL_TIMEOUT),
            cache,
            clock,
        )
    }

    async fn fail(b: &CircuitBreaker, calls: &AtomicU32) -> Result<Outcome<()>, ShieldError> {
        b.execute(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ShieldError::connection("downstream unavailable"))
        })
        .await
    }

    async fn succeed(b: &CircuitBreaker, calls: &AtomicU32) -> Result<Outcome<u32>, ShieldError> {
        b.execute(|| async { Ok(calls.fetch_add(1, Ordering::SeqCst)) }).await
    }

    #[tokio::test]
    async fn test_supabase_opens_serves_fallback_then_recovers() {
        let clock = ManualClock::new(1_000_000);
        let b = breaker(SUPABASE, clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..10 {
            assert!(fail(&b, &calls).await.is_err());
        }
        assert_eq!(b.get_status().await.state, CircuitState::Open);

        let eleventh = fail(&b, &calls).await.unwrap();
        assert!(eleventh.is_degraded());
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        clock.advance(Duration::from_secs(15));
        let twelfth = succeed(&b, &calls).await.unwrap();
        assert_eq!(twelfth, Outcome::Executed(10));
        assert_eq!(b.get_status().await.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let clock = ManualClock::new(0);
        let b = breaker(AZURE_OPENAI, clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _ = fail(&b, &calls).await;
        }
        clock.advance(Duration::from_secs(30));

        for _ in 0..2 {
            succeed(&b, &calls).await.unwrap();
            assert_eq!(b.get_status().await.state, CircuitState::HalfOpen);
        }
        succeed(&b, &calls).await.unwrap();

        let status = b.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.success_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        clock.advance(Duration::from_secs(60));
        let _ = fail(&b, &calls).await;

        let status = b.get_status().await;
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.next_attempt_time, Some(120_000));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_open_without_fallback_errors() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        clock.advance(Duration::from_millis(20_500));

        match succeed(&b, &calls).await {
            Err(ShieldError::CircuitOpen { service, retry_after_secs }) => {
                assert_eq!(service, EXTERNAL);
                assert_eq!(retry_after_secs, 40);
            }
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stale_failures_restart_count() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        let _ = fail(&b, &calls).await;
        let _ = fail(&b, &calls).await;
        clock.advance(Duration::from_secs(121));
        let _ = fail(&b, &calls).await;

        let status = b.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
    }

    #[tokio::test]
    async fn test_success_while_closed_clears_failures() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock);
        let calls = AtomicU32::new(0);

        let _ = fail(&b, &calls).await;
        let _ = fail(&b, &calls).await;
        succeed(&b, &calls).await.unwrap();
        let _ = fail(&b, &calls).await;

        let status = b.get_status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
    }

    #[tokio::test]
    async fn test_reset_and_eviction_read_back_closed() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        b.reset().await;
        assert_eq!(b.get_status().await, CircuitBreakerState::closed(EXTERNAL));

        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        clock.advance(Duration::from_secs(360));
        assert_eq!(b.get_status().await.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock);

        let result: Result<Outcome<()>, ShieldError> = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(31)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ShieldError::Timeout { .. })));
        assert_eq!(b.get_status().await.failure_count, 1);
    }

    #[tokio::test]
    async fn test_half_open_admits_bounded_trials() {
        let clock = ManualClock::new(0);
        let cache = CacheStore::in_memory(clock.clone(), "edu");
        let config = CircuitBreakerConfig {
            half_open_max_calls: Some(1),
            ..CircuitBreakerConfig::default()
        };
        let b = CircuitBreaker::new(
            "speechScoring",
            BreakerSettings::from_config(&config, DEFAULT_CALL_TIMEOUT),
            cache,
            clock.clone(),
        );
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }
        clock.advance(Duration::from_secs(60));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let trial = b.execute(|| async move {
            let _ = rx.await;
            Ok("recovered")
        });
        let excess = async {
            let r = b.execute(|| async { Ok("unexpected") }).await;
            let _ = tx.send(());
            r
        };

        let (trial, excess) = tokio::join!(trial, excess);
        assert_eq!(trial.unwrap(), Outcome::Executed("recovered"));
        assert!(matches!(excess, Err(ShieldError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_success_admitted_while_closed_is_not_a_trial() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let straggler = b.execute(|| async move {
            let _ = rx.await;
            Ok("late")
        });
        let driver = async {
            for _ in 0..3 {
                let _ = fail(&b, &calls).await;
            }
            clock.advance(Duration::from_secs(60));
            succeed(&b, &calls).await.unwrap();
            let _ = tx.send(());
        };

        let (late, ()) = tokio::join!(straggler, driver);
        assert_eq!(late.unwrap(), Outcome::Executed("late"));

        let status = b.get_status().await;
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.success_count, 1);
    }

    #[tokio::test]
    async fn test_admission_reads_skip_the_state_lock() {
        let clock = ManualClock::new(0);
        let b = breaker(EXTERNAL, clock.clone());
        let calls = AtomicU32::new(0);

        {
            let _held = b.lock.lock().await;
            let closed = tokio::time::timeout(Duration::from_secs(1), succeed(&b, &calls))
                .await
                .expect("closed admission must not wait on the lock");
            assert_eq!(closed.unwrap(), Outcome::Executed(0));
        }

        for _ in 0..3 {
            let _ = fail(&b, &calls).await;
        }

        let _held = b.lock.lock().await;
        let open = tokio::time::timeout(Duration::from_secs(1), succeed(&b, &calls))
            .await
            .expect("open rejection must not wait on the lock");
        assert!(matches!(open, Err(ShieldError::CircuitOpen { .. })));
    }

    #[test]
    fn test_registry_has_builtins() {
        let clock = ManualClock::new(0);
        let cache = CacheStore::in_memory(clock.clone(), "edu");
        let registry = CircuitBreakerRegistry::from_config(
            &builtin_circuit_breakers(),
            &cache,
            clock,
            DEFAULT_CALL_TIMEOUT,
        );
        assert_eq!(registry.len(), 3);
        let supabase = registry.get(SUPABASE).unwrap();
        assert_eq!(supabase.settings().failure_threshold, 10);
        assert_eq!(supabase.settings().half_open_max_calls, 5);
        assert!(registry.get("unknown").is_none());
    }
}
