//! Downstream call boundary.
//!
//! # Responsibilities
//! - Describe one downstream call independently of the HTTP stack
//! - Default hyper-backed client: host selection, request building,
//!   body collection
//!
//! # Design Decisions
//! - Calls return `'static` futures so each branch can run on its own task
//! - Request bodies are buffered `Bytes`, so retries resend the same payload
//! - Non-2xx responses are successful calls; classifying them is the caller's job

use std::fmt;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::aggregation::result::DownstreamResponse;
use crate::load_balancer::HostSelectors;
use crate::routing::matcher::Params;
use crate::routing::route::{HostAndPort, LoadBalancerHint, RouteDefinition};

/// Why a downstream call produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid downstream request: {0}")]
    InvalidRequest(String),
}

/// Everything needed to make one downstream call.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    /// Route label, used for per-route selector state and logs.
    pub route: String,
    pub method: Method,
    pub scheme: String,
    pub hosts: Vec<HostAndPort>,
    pub load_balancer: LoadBalancerHint,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamRequest {
    /// Target `route` with its downstream template rendered from `params`.
    pub fn for_route(
        route: &RouteDefinition,
        params: &Params,
        method: Method,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        let path = route.downstream.path.render(params);
        let path_and_query = match query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path,
        };
        Self {
            route: route.label(),
            method,
            scheme: route.downstream.scheme.clone(),
            hosts: route.downstream.hosts.clone(),
            load_balancer: route.load_balancer,
            path_and_query,
            headers,
            body,
        }
    }
}

/// Performs downstream calls.
pub trait DownstreamClient: Send + Sync + 'static {
    fn send(&self, request: DownstreamRequest) -> BoxFuture<'static, Result<DownstreamResponse, CallError>>;
}

/// Plain-HTTP client over hyper's pooled legacy client.
///
/// `https` targets are refused; embedders that need TLS plug in their own
/// [`DownstreamClient`].
#[derive(Clone)]
pub struct HyperDownstreamClient {
    client: Client<HttpConnector, Body>,
    selectors: HostSelectors,
    max_body_bytes: usize,
}

impl HyperDownstreamClient {
    pub fn new(max_body_bytes: usize) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            selectors: HostSelectors::new(),
            max_body_bytes,
        }
    }

    async fn call(self, request: DownstreamRequest) -> Result<DownstreamResponse, CallError> {
        if request.scheme != "http" {
            return Err(CallError::InvalidRequest(format!(
                "scheme {:?} needs a TLS-capable client",
                request.scheme
            )));
        }
        let host = self
            .selectors
            .select(&request.route, request.load_balancer, &request.hosts)
            .ok_or_else(|| CallError::InvalidRequest("route has no downstream hosts".to_string()))?;

        let uri: Uri = format!("{}://{}{}", request.scheme, host, request.path_and_query)
            .parse()
            .map_err(|e| CallError::InvalidRequest(format!("{e}")))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let outbound = builder
            .body(Body::from(request.body))
            .map_err(|e| CallError::InvalidRequest(e.to_string()))?;

        tracing::trace!(route = %request.route, host = %host, "Calling downstream");

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| CallError::Connection(e.to_string()))?;

        let (parts, incoming) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(incoming), self.max_body_bytes)
            .await
            .map_err(|e| CallError::Connection(format!("reading body from {host}: {e}")))?;

        Ok(DownstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl DownstreamClient for HyperDownstreamClient {
    fn send(&self, request: DownstreamRequest) -> BoxFuture<'static, Result<DownstreamResponse, CallError>> {
        Box::pin(self.clone().call(request))
    }
}

impl fmt::Debug for HyperDownstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperDownstreamClient")
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FragmentGlobals, RouteDefaults, RouteSpec};
    use crate::routing::route::EffectiveDefaults;

    fn route(downstream: &str) -> RouteDefinition {
        let spec = RouteSpec {
            key: Some("orders".into()),
            method: "GET".into(),
            upstream_path: "/orders/{id}".into(),
            upstream_host: None,
            downstream_path: downstream.into(),
            downstream_hosts: vec!["svc-orders:8080".into()],
            scheme: None,
            load_balancer: None,
            timeout_ms: None,
            retry: None,
            circuit_breaker: None,
            is_override: false,
        };
        let defaults = EffectiveDefaults::layer(&RouteDefaults::default(), &FragmentGlobals::default());
        RouteDefinition::from_spec(&spec, &"o.toml".into(), &defaults).unwrap()
    }

    #[test]
    fn test_request_renders_path_and_keeps_query() {
        let mut params = Params::new();
        params.insert("id".into(), "42".into());

        let request = DownstreamRequest::for_route(
            &route("/v2/orders/{id}"),
            &params,
            Method::GET,
            Some("page=2"),
            HeaderMap::new(),
            Bytes::new(),
        );

        assert_eq!(request.path_and_query, "/v2/orders/42?page=2");
        assert_eq!(request.route, "orders");
        assert_eq!(request.hosts[0].to_string(), "svc-orders:8080");
    }

    #[tokio::test]
    async fn test_https_refused_by_plain_client() {
        let mut request = DownstreamRequest::for_route(
            &route("/orders/{id}"),
            &Params::from([("id".to_string(), "1".to_string())]),
            Method::GET,
            None,
            HeaderMap::new(),
            Bytes::new(),
        );
        request.scheme = "https".into();

        let err = HyperDownstreamClient::new(1024).send(request).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let mut request = DownstreamRequest::for_route(
            &route("/orders/{id}"),
            &Params::from([("id".to_string(), "1".to_string())]),
            Method::GET,
            None,
            HeaderMap::new(),
            Bytes::new(),
        );
        request.hosts = vec!["127.0.0.1:1".parse().unwrap()];

        let err = HyperDownstreamClient::new(1024).send(request).await.unwrap_err();
        assert!(matches!(err, CallError::Connection(_)));
    }
}
