//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound one route call, retries included, by the route timeout
//! - Translate call errors into branch failures
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; dropping the future cancels the call
//! - Timeout errors are distinct from other errors
//! - Non-2xx responses come back as `Ok`; single routes pass them through

use std::sync::Arc;
use std::time::Duration;

use crate::aggregation::result::{BranchFailure, DownstreamResponse};
use crate::http::client::{DownstreamClient, DownstreamRequest};
use crate::resilience::retries::call_with_retries;
use crate::routing::route::RetryPolicy;

/// Run `request` with retries, giving up after `limit`.
pub async fn bounded_call(
    client: Arc<dyn DownstreamClient>,
    request: DownstreamRequest,
    limit: Duration,
    policy: RetryPolicy,
) -> Result<DownstreamResponse, BranchFailure> {
    let route = request.route.clone();
    match tokio::time::timeout(limit, call_with_retries(client.as_ref(), request, policy)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            tracing::warn!(route = %route, error = %e, "Downstream call failed");
            Err(BranchFailure::Connection(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(route = %route, timeout_ms = limit.as_millis() as u64, "Downstream call timed out");
            Err(BranchFailure::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode};
    use futures_util::future::BoxFuture;
    use crate::http::client::CallError;
    use crate::routing::route::LoadBalancerHint;

    #[derive(Clone, Copy)]
    enum Behavior {
        Slow(Duration),
        Refused,
    }

    struct Fake(Behavior);

    impl DownstreamClient for Fake {
        fn send(&self, _request: DownstreamRequest) -> BoxFuture<'static, Result<DownstreamResponse, CallError>> {
            let behavior = self.0;
            Box::pin(async move {
                match behavior {
                    Behavior::Slow(delay) => {
                        tokio::time::sleep(delay).await;
                        Ok(DownstreamResponse {
                            status: StatusCode::NOT_FOUND,
                            headers: HeaderMap::new(),
                            body: Bytes::new(),
                        })
                    }
                    Behavior::Refused => Err(CallError::Connection("refused".into())),
                }
            })
        }
    }

    fn request() -> DownstreamRequest {
        DownstreamRequest {
            route: "orders".into(),
            method: Method::GET,
            scheme: "http".into(),
            hosts: vec!["svc:80".parse().unwrap()],
            load_balancer: LoadBalancerHint::NoLoadBalancer,
            path_and_query: "/orders".into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    const ONCE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 10,
    };

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let client: Arc<dyn DownstreamClient> = Arc::new(Fake(Behavior::Slow(Duration::from_secs(5))));
        let outcome = bounded_call(client, request(), Duration::from_secs(1), ONCE).await;
        assert!(matches!(outcome, Err(BranchFailure::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_2xx_passes_through() {
        let client: Arc<dyn DownstreamClient> = Arc::new(Fake(Behavior::Slow(Duration::from_millis(5))));
        let response = bounded_call(client, request(), Duration::from_secs(1), ONCE).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_error_classified() {
        let client: Arc<dyn DownstreamClient> = Arc::new(Fake(Behavior::Refused));
        let outcome = bounded_call(client, request(), Duration::from_secs(1), ONCE).await;
        assert!(matches!(outcome, Err(BranchFailure::Connection(reason)) if reason.contains("refused")));
    }
}
