//! edu-shield ops server.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller (handler / job)
//!          │  identity + ProtectionProfile + operation
//!          ▼
//!   ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//!   │ rate_limit   │──▶│ circuit       │──▶│ retry +      │──▶ downstream
//!   │ (fixed win.) │   │ breaker       │   │ timeout      │   (AI, DB, API)
//!   └──────┬───────┘   └──────┬────────┘   └──────────────┘
//!          │                  │
//!          ▼                  ▼
//!   ┌─────────────────────────────────┐
//!   │ cache (Redis or in-memory)       │
//!   └─────────────────────────────────┘
//!
//!   ops server: /health, /health/circuits, /admin/*
//! ```

use tokio::net::TcpListener;

use edu_shield::config;
use edu_shield::http::HttpServer;
use edu_shield::lifecycle::{self, signals, Shutdown};
use edu_shield::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load()?;

    logging::init_tracing(&config.observability);
    tracing::info!("edu-shield v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        admin_enabled = config.admin.enabled,
        circuit_breakers = config.circuit_breakers.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shield = lifecycle::build_shield(&config).await;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(&config, shield);
    server.run(listener, shutdown.wait()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
