//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_reloads_total{outcome}` (counter): reload passes by outcome
//! - `gateway_reload_duration_seconds` (histogram): list + merge + publish time
//! - `gateway_routing_table_version` (gauge): published table version
//! - `gateway_routing_table_routes{kind}` (gauge): routes and aggregates published
//! - `gateway_aggregation_issues_total{kind}` (counter): merge issues by kind
//! - `gateway_requests_total{kind,status}` (counter): client requests
//! - `gateway_request_duration_seconds{kind}` (histogram): client request latency
//! - `gateway_branch_outcomes_total{route,outcome}` (counter): aggregate branch outcomes
//! - `gateway_branch_duration_seconds{route}` (histogram): aggregate branch latency
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::routing::table::RoutingTable;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_reload(outcome: &'static str, elapsed: Duration) {
    counter!("gateway_reloads_total", "outcome" => outcome).increment(1);
    histogram!("gateway_reload_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_table(table: &RoutingTable) {
    gauge!("gateway_routing_table_version").set(table.version() as f64);
    gauge!("gateway_routing_table_routes", "kind" => "route").set(table.route_count() as f64);
    gauge!("gateway_routing_table_routes", "kind" => "aggregate").set(table.aggregate_count() as f64);
}

pub fn record_aggregation_issue(kind: &'static str) {
    counter!("gateway_aggregation_issues_total", "kind" => kind).increment(1);
}

/// `kind` is `route`, `aggregate` or `none`.
pub fn record_request(kind: &'static str, status: u16, started: Instant) {
    counter!("gateway_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
    histogram!("gateway_request_duration_seconds", "kind" => kind).record(started.elapsed().as_secs_f64());
}

pub fn record_branch(route: &str, outcome: &'static str, elapsed: Duration) {
    counter!("gateway_branch_outcomes_total", "route" => route.to_string(), "outcome" => outcome).increment(1);
    histogram!("gateway_branch_duration_seconds", "route" => route.to_string()).record(elapsed.as_secs_f64());
}
