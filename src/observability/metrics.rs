//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define shield metrics (rejections, breaker transitions, cache faults)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `shield_requests_total` (counter): protected operations by class and outcome
//! - `shield_request_duration_seconds` (histogram): protected operation latency
//! - `shield_rate_limited_total` (counter): rejections by class
//! - `shield_rate_limit_fail_open_total` (counter): checks allowed because the store failed
//! - `shield_circuit_transitions_total` (counter): state changes by service and target state
//! - `shield_circuit_rejected_total` (counter): calls refused while open
//! - `shield_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `shield_retries_total` (counter): retry attempts by error kind
//! - `shield_cache_errors_total` (counter): swallowed cache failures by operation
//! - `shield_local_rate_limit_windows` (gauge): windows tracked by the in-process limiter
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users pay nothing
//! - Labels are low-cardinality: class, service, operation, never identifiers

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::rate_limit::RateLimitClass;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the global Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

pub fn record_request(class: RateLimitClass, outcome: &'static str, start: Instant) {
    let class = class.as_str();
    counter!("shield_requests_total", "class" => class, "outcome" => outcome).increment(1);
    histogram!("shield_request_duration_seconds", "class" => class)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(class: RateLimitClass) {
    counter!("shield_rate_limited_total", "class" => class.as_str()).increment(1);
}

pub fn record_rate_limit_fail_open(class: RateLimitClass) {
    counter!("shield_rate_limit_fail_open_total", "class" => class.as_str()).increment(1);
}

pub fn record_local_windows(count: usize) {
    gauge!("shield_local_rate_limit_windows").set(count as f64);
}

pub fn record_breaker_transition(service: &str, to: CircuitState) {
    counter!(
        "shield_circuit_transitions_total",
        "service" => service.to_string(),
        "state" => to.as_str()
    )
    .increment(1);

    let value = match to {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("shield_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_breaker_rejected(service: &str) {
    counter!("shield_circuit_rejected_total", "service" => service.to_string()).increment(1);
}

pub fn record_retry(kind: &'static str) {
    counter!("shield_retries_total", "kind" => kind).increment(1);
}

pub fn record_cache_error(operation: &'static str) {
    counter!("shield_cache_errors_total", "operation" => operation).increment(1);
}
