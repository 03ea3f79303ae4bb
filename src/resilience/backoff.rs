//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

use crate::routing::route::RetryPolicy;

/// Delay before retry number `attempt` (1-based) under `policy`.
///
/// `base * 2^(attempt-1)`, capped at `max_delay_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u64.saturating_pow(attempt - 1);
    let capped = policy.base_delay_ms.saturating_mul(exponential).min(policy.max_delay_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
