//! End-to-end behaviour of protected calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use axum::{middleware, routing::get, Json, Router};
use edu_shield::http::middleware::{rate_limit_middleware, RateLimitState};
use edu_shield::http::RequestIdentity;
use edu_shield::resilience::circuit_breaker::SUPABASE;
use edu_shield::resilience::CircuitState;
use edu_shield::{ProtectionProfile, RateLimitClass, ShieldError};
use serde_json::json;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_ai_operations_admit_twenty_per_minute() {
    // A minute boundary, then 15s into that window.
    let (shield, clock) = common::shield_at(1_699_999_980_000);
    clock.advance(Duration::from_secs(15));
    let identity = RequestIdentity::principal("learner-7");
    let profile = ProtectionProfile::new(RateLimitClass::AiOperations);

    let mut responses = Vec::new();
    for _ in 0..25 {
        let response = shield
            .protect(&identity, &profile, || async {
                Ok(Json(json!({"reply": "¡Muy bien!"})))
            })
            .await;
        responses.push(response);
    }

    let ok = responses.iter().filter(|r| r.status() == StatusCode::OK).count();
    let rejected = responses
        .iter()
        .filter(|r| r.status() == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!((ok, rejected), (20, 5));

    assert_eq!(common::header(&responses[0], "x-ratelimit-remaining"), "19");
    assert_eq!(common::header(&responses[0], "x-ratelimit-limit"), "20");
    assert_eq!(common::header(&responses[19], "x-ratelimit-remaining"), "0");

    // Window started 15s ago, so every rejection waits the same 45s.
    for response in &responses[20..] {
        assert_eq!(common::header(response, "x-ratelimit-remaining"), "0");
        assert_eq!(common::header(response, "retry-after"), "45");
    }

    let body = common::json_body(responses.pop().unwrap()).await;
    assert_eq!(body["retryAfter"], 45);
    assert_eq!(body["error"], "Too many requests");
}

#[tokio::test]
async fn test_supabase_fallback_and_recovery() {
    let (shield, clock) = common::shield_at(0);
    let identity = RequestIdentity::principal("learner-7");
    let profile = ProtectionProfile::new(RateLimitClass::DatabaseWrites).with_circuit_breaker(SUPABASE);
    let calls = AtomicU32::new(0);

    for _ in 0..10 {
        let response = shield
            .protect(&identity, &profile, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Json<serde_json::Value>, _>(ShieldError::connection("connection reset"))
            })
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(common::json_body(response).await["code"], "DATABASE_ERROR");
    }

    let breaker = shield.breakers().get(SUPABASE).unwrap();
    assert_eq!(breaker.get_status().await.state, CircuitState::Open);

    let fallback = shield
        .protect(&identity, &profile, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Json(json!({"progress": 42})))
        })
        .await;
    assert_eq!(fallback.status(), StatusCode::OK);
    assert_eq!(common::header(&fallback, "x-degraded"), "true");
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    let body = common::json_body(fallback).await;
    assert_eq!(body["degraded"], true);
    assert_eq!(body["error"], "Database temporarily unavailable");

    clock.advance(Duration::from_secs(15));
    let recovered = shield
        .protect(&identity, &profile, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Json(json!({"progress": 42})))
        })
        .await;
    assert_eq!(recovered.status(), StatusCode::OK);
    assert!(recovered.headers().get("x-degraded").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 11);
    assert_eq!(common::json_body(recovered).await["progress"], 42);
}

#[tokio::test(start_paused = true)]
async fn test_error_classification() {
    let (shield, _clock) = common::shield_at(0);
    let identity = RequestIdentity::principal("learner-7");
    let profile = ProtectionProfile::new(RateLimitClass::General);

    let timeout = shield
        .protect(&identity, &profile, || async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            Ok("late")
        })
        .await;
    assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(common::json_body(timeout).await["code"], "TIMEOUT");

    let quota = shield
        .protect(&identity, &profile, || async {
            Err::<&str, _>(ShieldError::QuotaExceeded("monthly token budget".into()))
        })
        .await;
    assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(common::json_body(quota).await["code"], "QUOTA_EXCEEDED");

    let internal = shield
        .protect(&identity, &profile, || async {
            Err::<&str, _>(ShieldError::operation("stack trace with secrets"))
        })
        .await;
    assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = common::json_body(internal).await;
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert!(!body.to_string().contains("secrets"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_inside_one_call() {
    let (shield, _clock) = common::shield_at(0);
    let identity = RequestIdentity::principal("learner-7");
    let profile = ProtectionProfile::new(RateLimitClass::AiOperations)
        .with_circuit_breaker("azureOpenAI")
        .with_retry(shield.default_retry());
    let calls = AtomicU32::new(0);

    let guarded = shield
        .run(&identity, &profile, || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(ShieldError::Timeout { after: Duration::from_secs(5) }),
                _ => Ok("translation"),
            }
        })
        .await
        .unwrap();

    assert_eq!(guarded.outcome.executed(), Some("translation"));
    assert_eq!(guarded.rate_limit.remaining, 19);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_router_middleware_limits_per_ip() {
    let (shield, _clock) = common::shield_at(0);
    let app = Router::new()
        .route("/lessons/export", get(|| async { "exported" }))
        .layer(middleware::from_fn_with_state(
            RateLimitState::new(shield, RateLimitClass::BulkOperations),
            rate_limit_middleware,
        ));

    let request = |ip: &str| {
        axum::http::Request::builder()
            .uri("/lessons/export")
            .header("x-forwarded-for", ip)
            .body(axum::body::Body::empty())
            .unwrap()
    };

    for i in 0..5 {
        let response = app.clone().oneshot(request("203.0.113.9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            common::header(&response, "x-ratelimit-remaining"),
            (4 - i).to_string()
        );
    }

    let blocked = app.clone().oneshot(request("203.0.113.9")).await.unwrap();
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(common::header(&blocked, "retry-after"), "300");

    let other = app.oneshot(request("198.51.100.4")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}
