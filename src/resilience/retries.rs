//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a call outcome is retryable (idempotent methods only)
//! - Re-issue the call with exponential backoff + jitter
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Connection errors and 502/503/504 are retryable; other statuses are answers
//! - The caller's timeout bounds the whole loop, sleeps included

use axum::http::{Method, StatusCode};

use crate::aggregation::result::DownstreamResponse;
use crate::http::client::{CallError, DownstreamClient, DownstreamRequest};
use crate::resilience::backoff::calculate_backoff;
use crate::routing::route::RetryPolicy;

/// Whether `outcome` of a `method` call is worth another attempt.
pub fn is_retryable(method: &Method, outcome: &Result<DownstreamResponse, CallError>) -> bool {
    if !method.is_idempotent() {
        return false;
    }
    match outcome {
        Ok(response) => matches!(
            response.status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ),
        Err(CallError::Connection(_)) => true,
        Err(CallError::InvalidRequest(_)) => false,
    }
}

/// Send `request`, retrying per `policy`. Returns the last outcome.
pub async fn call_with_retries(
    client: &dyn DownstreamClient,
    request: DownstreamRequest,
    policy: RetryPolicy,
) -> Result<DownstreamResponse, CallError> {
    let mut attempt = 1;
    loop {
        let outcome = client.send(request.clone()).await;
        if attempt >= policy.max_attempts || !is_retryable(&request.method, &outcome) {
            return outcome;
        }

        let delay = calculate_backoff(attempt, &policy);
        tracing::debug!(
            route = %request.route,
            attempt,
            delay_ms = delay.as_millis() as u64,
            status = outcome.as_ref().ok().map(|r| r.status.as_u16()),
            "Retrying downstream call"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
