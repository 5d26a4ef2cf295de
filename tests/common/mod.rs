//! Shared utilities for integration tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use edu_shield::clock::ManualClock;
use edu_shield::{CacheStore, Shield, ShieldConfig};
use serde_json::Value;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Shield over an in-memory cache with a hand-driven clock.
pub fn shield_at(start_millis: u64) -> (Shield, Arc<ManualClock>) {
    shield_with(&ShieldConfig::default(), start_millis)
}

pub fn shield_with(config: &ShieldConfig, start_millis: u64) -> (Shield, Arc<ManualClock>) {
    let clock = ManualClock::new(start_millis);
    let cache = CacheStore::in_memory(clock.clone(), "edu");
    (Shield::from_config(config, cache, clock.clone()), clock)
}

#[allow(dead_code)]
pub fn admin_config() -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[allow(dead_code)]
pub fn admin(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[allow(dead_code)]
pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| panic!("missing header {}", name))
}
