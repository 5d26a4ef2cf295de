//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the ops handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Mount admin routes when enabled
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::ShieldConfig;
use crate::health::{circuit_breaker_health, system_health};
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::shield::Shield;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub shield: Shield,
    pub admin_api_key: Arc<str>,
}

/// Ops HTTP server: health and admin endpoints.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ShieldConfig, shield: Shield) -> Self {
        let state = AppState {
            shield,
            admin_api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ShieldConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/circuits", get(circuits_handler))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    Json(system_health(&state.shield).await).into_response()
}

async fn circuits_handler(State(state): State<AppState>) -> Response {
    let report = circuit_breaker_health(state.shield.breakers()).await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
