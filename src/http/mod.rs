//! HTTP surface subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/ (router-wide rate limit)
//!     → request.rs (resolve identity: principal or client IP)
//!     → Shield::protect (rate limit, breaker, retry)
//!     → response.rs (rate-limit headers, error classification)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{AuthenticatedPrincipal, RequestIdentity, UuidRequestId, X_REQUEST_ID};
pub use response::classify;
pub use server::{AppState, HttpServer};
