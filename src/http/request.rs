//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) unless the client sent one
//! - Strip headers that must not be forwarded
//! - Buffer the body once so every downstream call can reuse it
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Original headers preserved for logging; a filtered copy is forwarded

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::aggregation::executor::InboundRequest;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Connection-scoped headers, never forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Layer assigning an `x-request-id` to requests without one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer copying the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Copy of `headers` without hop-by-hop headers, anything the `Connection`
/// header names, and `host`.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let named_by_connection: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP.iter().chain(named_by_connection.iter()) {
        forwarded.remove(name);
    }
    forwarded.remove(header::HOST);
    forwarded
}

/// Host the client addressed, from the URI or the `Host` header.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

/// Why the inbound body could not be buffered.
#[derive(Debug, thiserror::Error)]
#[error("request body unreadable or larger than {limit} bytes")]
pub struct BodyTooLarge {
    pub limit: usize,
}

/// Buffer the request into the form forwarded downstream.
pub async fn into_inbound(request: Request<Body>, limit: usize) -> Result<InboundRequest, BodyTooLarge> {
    let (parts, body) = request.into_parts();
    let body: Bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| BodyTooLarge { limit })?;

    Ok(InboundRequest {
        method: parts.method,
        query: parts.uri.query().map(str::to_string),
        headers: forwardable_headers(&parts.headers),
        body,
    })
}
