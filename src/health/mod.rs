//! Health reporting.
//!
//! # Data Flow
//! ```text
//! CircuitBreakerRegistry
//!     → get_status() on every breaker (concurrently)
//!     → CircuitHealthReport (healthy only when every breaker is CLOSED)
//!
//! CacheStore::health_check + CircuitHealthReport
//!     → SystemHealth (served on GET /health)
//! ```
//!
//! # Design Decisions
//! - Reports read persisted state only; they never move a breaker out of OPEN
//! - A half-open breaker counts as unhealthy

use futures_util::future::join_all;
use serde::Serialize;

use crate::cache::CacheHealth;
use crate::resilience::{CircuitBreakerRegistry, CircuitBreakerState, CircuitState};
use crate::shield::Shield;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerHealth {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_time: Option<u64>,
}

impl From<CircuitBreakerState> for BreakerHealth {
    fn from(state: CircuitBreakerState) -> Self {
        Self {
            service: state.service_name,
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            next_attempt_time: state.next_attempt_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitHealthReport {
    pub healthy: bool,
    pub services: Vec<BreakerHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: &'static str,
    pub cache: CacheHealth,
    pub circuits: CircuitHealthReport,
}

pub async fn circuit_breaker_health(registry: &CircuitBreakerRegistry) -> CircuitHealthReport {
    let states = join_all(registry.iter().map(|breaker| breaker.get_status())).await;
    let services: Vec<BreakerHealth> = states.into_iter().map(BreakerHealth::from).collect();
    let healthy = services.iter().all(|s| s.state == CircuitState::Closed);
    CircuitHealthReport { healthy, services }
}

pub async fn system_health(shield: &Shield) -> SystemHealth {
    let (cache, circuits) = tokio::join!(
        shield.cache().health_check(),
        circuit_breaker_health(shield.breakers())
    );
    let status = if cache.healthy && circuits.healthy {
        "ok"
    } else {
        "degraded"
    };
    SystemHealth {
        status,
        cache,
        circuits,
    }
}
