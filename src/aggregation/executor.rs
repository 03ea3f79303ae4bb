//! Concurrent execution of aggregate routes.
//!
//! # Data Flow
//! ```text
//! Aggregate resolved (definition, params, table snapshot)
//!     → one task per constituent route, all spawned up front
//!         each: route timeout ⊃ retries ⊃ downstream call
//!     → join in declaration order, bounded by the aggregate deadline
//!         pending at the deadline → aborted, recorded as Timeout
//!     → merge strategy, exactly once
//! ```
//!
//! # Design Decisions
//! - A branch never fails its siblings; every outcome lands in its own result
//! - Aborting a branch only touches that branch's task
//! - Branch tasks are aborted when the request future is dropped
//! - Each branch goes through its route's circuit breaker
//! - Constituent downstream templates take values from the aggregate's
//!   captured parameters by name

use std::sync::Arc;
use std::time::Duration;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::aggregation::result::{AggregateResponse, BranchFailure, DownstreamResponse, DownstreamResult};
use crate::aggregation::strategy::StrategyRegistry;
use crate::http::client::{DownstreamClient, DownstreamRequest};
use crate::observability::metrics;
use crate::resilience::{guarded_call, CircuitBreakers};
use crate::routing::matcher::Params;
use crate::routing::route::AggregateRouteDefinition;
use crate::routing::table::RoutingTable;

/// The parts of a client request forwarded to downstream calls.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub query: Option<String>,
    /// Already stripped of hop-by-hop headers and `host`.
    pub headers: HeaderMap,
    pub body: Bytes,
}

type BranchOutput = (Result<DownstreamResponse, BranchFailure>, Duration);

/// A spawned branch, aborted on drop.
struct Branch(JoinHandle<BranchOutput>);

impl Drop for Branch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs aggregate routes against a downstream client.
#[derive(Clone)]
pub struct AggregateExecutor {
    client: Arc<dyn DownstreamClient>,
    strategies: Arc<StrategyRegistry>,
    breakers: CircuitBreakers,
}

impl AggregateExecutor {
    pub fn new(client: Arc<dyn DownstreamClient>, strategies: Arc<StrategyRegistry>) -> Self {
        Self {
            client,
            strategies,
            breakers: CircuitBreakers::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn DownstreamClient> {
        &self.client
    }

    /// Breakers shared by aggregate branches and single-route calls.
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Fan out to every constituent, then merge.
    ///
    /// Completes within the aggregate timeout plus merge time.
    pub async fn execute(
        &self,
        request: &InboundRequest,
        aggregate: &AggregateRouteDefinition,
        params: &Params,
        table: &RoutingTable,
    ) -> AggregateResponse {
        let started = Instant::now();
        let deadline = started + aggregate.timeout;

        let branches: Vec<(&str, Option<Branch>)> = aggregate
            .route_keys
            .iter()
            .map(|key| (key.as_str(), self.spawn_branch(key, request, params, table)))
            .collect();

        let mut results = Vec::with_capacity(branches.len());
        for (key, branch) in branches {
            let result = match branch {
                Some(handle) => join_branch(key, handle, deadline, started).await,
                None => {
                    tracing::error!(route = %key, version = table.version(), "Constituent missing from routing table");
                    DownstreamResult::new(key, Duration::ZERO, Err(BranchFailure::Connection("route not in table".into())))
                }
            };

            metrics::record_branch(key, result.outcome_label(), result.elapsed());
            tracing::debug!(
                route = %key,
                outcome = result.outcome_label(),
                elapsed_ms = result.elapsed().as_millis() as u64,
                "Branch finished"
            );
            results.push(result);
        }

        let Some(strategy) = self.strategies.get(&aggregate.strategy) else {
            tracing::error!(strategy = %aggregate.strategy, "Merge strategy not registered");
            return AggregateResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": "merge strategy unavailable" }),
            );
        };

        let response = strategy.merge(&results);
        tracing::debug!(
            upstream = %aggregate.upstream.path,
            strategy = strategy.name(),
            status = response.status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregate merged"
        );
        response
    }

    fn spawn_branch(&self, key: &str, request: &InboundRequest, params: &Params, table: &RoutingTable) -> Option<Branch> {
        let route = Arc::clone(table.route_by_key(key)?);
        let downstream = DownstreamRequest::for_route(
            &route,
            params,
            request.method.clone(),
            request.query.as_deref(),
            request.headers.clone(),
            request.body.clone(),
        );
        let client = Arc::clone(&self.client);
        let breakers = self.breakers.clone();

        Some(Branch(tokio::spawn(async move {
            let begun = Instant::now();
            let outcome = guarded_call(client, &breakers, &route, downstream).await;
            (outcome, begun.elapsed())
        })))
    }
}

async fn join_branch(key: &str, mut branch: Branch, deadline: Instant, started: Instant) -> DownstreamResult {
    match tokio::time::timeout_at(deadline, &mut branch.0).await {
        Ok(Ok((Ok(response), elapsed))) => DownstreamResult::from_response(key, elapsed, response),
        Ok(Ok((Err(failure), elapsed))) => DownstreamResult::new(key, elapsed, Err(failure)),
        Ok(Err(e)) => {
            tracing::error!(route = %key, error = %e, "Branch task failed");
            DownstreamResult::new(key, started.elapsed(), Err(BranchFailure::Connection(e.to_string())))
        }
        Err(_) => {
            branch.0.abort();
            tracing::warn!(route = %key, "Aggregate deadline reached, branch aborted");
            DownstreamResult::timeout(key, started.elapsed())
        }
    }
}

impl std::fmt::Debug for AggregateExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateExecutor")
            .field("strategies", &self.strategies.names())
            .finish()
    }
}
