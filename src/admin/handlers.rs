use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::cache::CacheHealth;
use crate::health::{circuit_breaker_health, BreakerHealth, CircuitHealthReport};
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub rate_limiter: &'static str,
    pub circuit_breakers: usize,
}

#[derive(Serialize)]
pub struct CacheStatus {
    #[serde(flatten)]
    pub health: CacheHealth,
    pub key_prefix: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        rate_limiter: state.shield.limiter().variant(),
        circuit_breakers: state.shield.breakers().len(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<CircuitHealthReport> {
    Json(circuit_breaker_health(state.shield.breakers()).await)
}

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BreakerHealth>, StatusCode> {
    let breaker = state.shield.breakers().get(&name).ok_or(StatusCode::NOT_FOUND)?;
    breaker.reset().await;
    Ok(Json(breaker.get_status().await.into()))
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheStatus> {
    Json(CacheStatus {
        health: state.shield.cache().health_check().await,
        key_prefix: state.shield.cache().prefix().to_string(),
    })
}
