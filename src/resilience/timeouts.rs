//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap protected calls with a deadline
//! - Cancel the inner future cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and map to 504

use std::future::Future;
use std::time::Duration;

use crate::error::ShieldError;

/// Run `fut`, turning an elapsed deadline into `ShieldError::Timeout`.
pub async fn with_timeout<T, F>(after: Duration, fut: F) -> Result<T, ShieldError>
where
    F: Future<Output = Result<T, ShieldError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ShieldError::Timeout { after }),
    }
}
