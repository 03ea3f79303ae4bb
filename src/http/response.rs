//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn downstream and aggregate results into client responses
//! - Remove hop-by-hop headers from passed-through responses
//! - Map call failures to gateway status codes
//!
//! # Design Decisions
//! - Downstream timeouts result in 504 Gateway Timeout
//! - Connection failures result in 502 Bad Gateway
//! - Gateway-generated errors are small JSON objects

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::aggregation::result::{AggregateResponse, BranchFailure, DownstreamResponse};
use crate::http::request::forwardable_headers;

impl IntoResponse for AggregateResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Relay a downstream response to the client.
pub fn passthrough(downstream: DownstreamResponse) -> Response {
    let mut headers = forwardable_headers(&downstream.headers);
    headers.remove(header::CONTENT_LENGTH);

    let mut response = Response::new(Body::from(downstream.body));
    *response.status_mut() = downstream.status;
    *response.headers_mut() = headers;
    response
}

/// Response for a single-route call that produced no downstream answer.
pub fn failure(failure: &BranchFailure) -> Response {
    match failure {
        BranchFailure::Timeout => error(StatusCode::GATEWAY_TIMEOUT, "downstream timeout"),
        BranchFailure::Connection(_) => error(StatusCode::BAD_GATEWAY, "downstream unavailable"),
        BranchFailure::Status(downstream) => passthrough(downstream.clone()),
        BranchFailure::CircuitOpen => error(StatusCode::SERVICE_UNAVAILABLE, "downstream circuit open"),
    }
}

pub fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "route not found")
}

/// `{"error": message}` with `status`.
pub fn error(status: StatusCode, message: &str) -> Response {
    let mut response = (status, Json(json!({ "error": message }))).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::HeaderMap;

    async fn body_of(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, Bytes::from_static(br#"{"error":"route not found"}"#));
    }

    #[tokio::test]
    async fn test_failures_map_to_gateway_statuses() {
        assert_eq!(failure(&BranchFailure::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(failure(&BranchFailure::Connection("reset".into())).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(failure(&BranchFailure::CircuitOpen).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_passthrough_keeps_status_and_strips_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert("x-upstream", "orders".parse().unwrap());

        let response = passthrough(DownstreamResponse {
            status: StatusCode::IM_A_TEAPOT,
            headers,
            body: Bytes::from_static(b"short and stout"),
        });

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(response.headers().get(header::CONNECTION).is_none());
        assert_eq!(response.headers()["x-upstream"], "orders");
        assert_eq!(body_of(response).await, Bytes::from_static(b"short and stout"));
    }

    #[tokio::test]
    async fn test_aggregate_response_into_response() {
        let aggregate = AggregateResponse::json(StatusCode::BAD_GATEWAY, &json!({"a": {"error": "timeout"}}));
        let response = aggregate.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }
}
