//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before retry number `attempt + 1` (0-indexed).
///
/// `min(base * 2^attempt, max)` plus up to 10% jitter, never exceeding `max`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter).min(max_ms))
}
