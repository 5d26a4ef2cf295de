//! Response shaping for protected calls.
//!
//! # Responsibilities
//! - Map `ShieldError` kinds to HTTP status codes and JSON bodies
//! - Attach rate-limit headers to every response that passed a check
//! - Render degraded fallback payloads
//!
//! # Design Decisions
//! - One classifier for every error; callers never pick status codes
//! - Bodies never carry internal detail beyond the error kind
//! - Timeouts return 504, store failures 503

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ShieldError;
use crate::rate_limit::RateLimitResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_DEGRADED: HeaderName = HeaderName::from_static("x-degraded");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBody {
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    pub code: &'static str,
}

/// Write `X-RateLimit-*` headers; reset is in epoch seconds.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_time.div_ceil(1_000)));
}

/// 429 for a rejected rate-limit check.
pub fn rate_limited(result: &RateLimitResult) -> Response {
    let body = RateLimitBody {
        error: "Too many requests",
        message: format!(
            "Rate limit exceeded. Try again in {} seconds.",
            result.retry_after_secs
        ),
        retry_after: result.retry_after_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, result);
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(result.retry_after_secs),
    );
    response
}

/// 200 with the degraded payload served while a circuit is open.
pub fn degraded(payload: serde_json::Value) -> Response {
    let mut response = (StatusCode::OK, Json(payload)).into_response();
    response
        .headers_mut()
        .insert(X_DEGRADED, HeaderValue::from_static("true"));
    response
}

/// Map an error to its transport response.
pub fn classify(err: &ShieldError) -> Response {
    let (status, error, message, code) = match err {
        ShieldError::RateLimited(result) => return rate_limited(result),
        ShieldError::CircuitOpen { retry_after_secs, .. } => {
            let mut response = error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                "The service is recovering. Please try again shortly.",
                "SERVICE_UNAVAILABLE",
            );
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(*retry_after_secs),
            );
            return response;
        }
        ShieldError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "Request timeout",
            "The operation took too long to complete.",
            "TIMEOUT",
        ),
        ShieldError::Connection(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
            "A storage dependency is unreachable.",
            "DATABASE_ERROR",
        ),
        ShieldError::QuotaExceeded(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Quota exceeded",
            "The usage quota for this service has been reached.",
            "QUOTA_EXCEEDED",
        ),
        ShieldError::Operation(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "An unexpected error occurred.",
            "INTERNAL_ERROR",
        ),
    };
    error_response(status, error, message, code)
}

fn error_response(
    status: StatusCode,
    error: &'static str,
    message: &'static str,
    code: &'static str,
) -> Response {
    (status, Json(ErrorBody { error, message, code })).into_response()
}
