//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Resolve each request against one routing table snapshot
//! - Forward single routes; hand aggregates to the executor
//! - Stop accepting on shutdown and drain in-flight requests

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::aggregation::executor::AggregateExecutor;
use crate::config::ListenerConfig;
use crate::http::client::DownstreamRequest;
use crate::http::request::{into_inbound, propagate_request_id_layer, request_host, request_id, set_request_id_layer};
use crate::http::response;
use crate::observability::metrics;
use crate::observability::tracing::make_request_span;
use crate::resilience::guarded_call;
use crate::routing::{Reloader, Resolution};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub reloader: Arc<Reloader>,
    pub executor: AggregateExecutor,
    pub max_body_bytes: usize,
}

/// The client-facing gateway server.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &ListenerConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// The router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Gateway draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Resolve against one table snapshot and dispatch.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let table = state.reloader.current();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let host = request_host(&request);

    let Some(resolution) = table.resolve(&method, host.as_deref(), &path) else {
        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            version = table.version(),
            "No route matched"
        );
        metrics::record_request("none", StatusCode::NOT_FOUND.as_u16(), started);
        return response::not_found();
    };

    let inbound = match into_inbound(request, state.max_body_bytes).await {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Rejecting request body");
            metrics::record_request("none", StatusCode::PAYLOAD_TOO_LARGE.as_u16(), started);
            return response::error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    match resolution {
        Resolution::Route { route, params } => {
            tracing::debug!(
                request_id = %request_id,
                route = %route.label(),
                version = table.version(),
                "Forwarding to route"
            );
            let downstream = DownstreamRequest::for_route(
                &route,
                &params,
                inbound.method,
                inbound.query.as_deref(),
                inbound.headers,
                inbound.body,
            );
            let client = Arc::clone(state.executor.client());
            let response = match guarded_call(client, state.executor.breakers(), &route, downstream).await {
                Ok(downstream) => response::passthrough(downstream),
                Err(failure) => response::failure(&failure),
            };
            metrics::record_request("route", response.status().as_u16(), started);
            response
        }
        Resolution::Aggregate { aggregate, params } => {
            tracing::debug!(
                request_id = %request_id,
                upstream = %aggregate.upstream.path,
                branches = aggregate.route_keys.len(),
                version = table.version(),
                "Executing aggregate"
            );
            let response = state.executor.execute(&inbound, &aggregate, &params, &table).await;
            metrics::record_request("aggregate", response.status.as_u16(), started);
            response.into_response()
        }
    }
}
