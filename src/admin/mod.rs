pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::middleware::{rate_limit_middleware, RateLimitState};
use crate::http::server::AppState;
use crate::rate_limit::RateLimitClass;

/// Admin routes: the per-IP global limit, then bearer auth.
pub fn setup_admin_router(state: AppState) -> Router {
    let limit = RateLimitState::new(state.shield.clone(), RateLimitClass::Global);

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/circuits/{name}/reset", post(reset_circuit))
        .route("/admin/cache", get(get_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(middleware::from_fn_with_state(limit, rate_limit_middleware))
        .with_state(state)
}
