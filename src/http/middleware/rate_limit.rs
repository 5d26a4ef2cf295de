//! Router-wide rate limiting.
//!
//! Applies one class to every route behind it. Handlers that also need a
//! circuit breaker use `Shield::protect` instead.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::request::RequestIdentity;
use crate::http::response::{apply_rate_limit_headers, rate_limited};
use crate::rate_limit::RateLimitClass;
use crate::shield::Shield;

/// State for `rate_limit_middleware`.
#[derive(Clone)]
pub struct RateLimitState {
    pub shield: Shield,
    pub class: RateLimitClass,
}

impl RateLimitState {
    pub fn new(shield: Shield, class: RateLimitClass) -> Self {
        Self { shield, class }
    }
}

/// Middleware function for fixed-window rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = RequestIdentity::from_request(&request);
    let result = state.shield.check_limit(&identity, state.class).await;

    if !result.allowed {
        tracing::warn!(
            client = %identity.identifier_for(state.class),
            class = %state.class,
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return rate_limited(&result);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}
