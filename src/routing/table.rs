//! Immutable, versioned routing snapshot.
//!
//! # Responsibilities
//! - Hold the merged routes and aggregates of one aggregation pass
//! - Resolve a request to a route or aggregate, with captured parameters
//! - Look up constituent routes by key
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Resolution order is fixed at construction: most specific first
//! - Explicit `None` rather than a silent default route

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use axum::http::Method;
use serde::Serialize;

use crate::routing::aggregator::AggregationReport;
use crate::routing::matcher::Params;
use crate::routing::route::{AggregateRouteDefinition, MatchKey, RouteDefinition};

/// Outcome of resolving a request against a table.
#[derive(Debug, Clone)]
pub enum Resolution {
    Route {
        route: Arc<RouteDefinition>,
        params: Params,
    },
    Aggregate {
        aggregate: Arc<AggregateRouteDefinition>,
        params: Params,
    },
}

#[derive(Debug, Clone)]
enum Entry {
    Route(Arc<RouteDefinition>),
    Aggregate(Arc<AggregateRouteDefinition>),
}

/// The table contents without the version, in a deterministic order.
#[derive(Debug, Serialize)]
pub struct TableContents<'a> {
    pub routes: Vec<&'a RouteDefinition>,
    pub aggregates: Vec<&'a AggregateRouteDefinition>,
}

/// A complete, validated set of routes at one version.
#[derive(Debug)]
pub struct RoutingTable {
    version: u64,
    routes: BTreeMap<MatchKey, Arc<RouteDefinition>>,
    aggregates: BTreeMap<MatchKey, Arc<AggregateRouteDefinition>>,
    by_key: HashMap<String, Arc<RouteDefinition>>,
    resolution_order: Vec<Entry>,
    report: AggregationReport,
}

impl RoutingTable {
    /// The table served before any fragments have been merged.
    pub fn empty() -> Self {
        Self::build(0, BTreeMap::new(), BTreeMap::new(), AggregationReport::default())
    }

    /// Callers guarantee the table invariants: unique match keys across
    /// routes and aggregates, and resolvable constituent keys.
    pub(crate) fn build(
        version: u64,
        routes: BTreeMap<MatchKey, RouteDefinition>,
        aggregates: BTreeMap<MatchKey, AggregateRouteDefinition>,
        report: AggregationReport,
    ) -> Self {
        let routes: BTreeMap<_, _> = routes.into_iter().map(|(k, r)| (k, Arc::new(r))).collect();
        let aggregates: BTreeMap<_, _> = aggregates.into_iter().map(|(k, a)| (k, Arc::new(a))).collect();

        let by_key = routes
            .values()
            .filter_map(|route| route.key.clone().map(|key| (key, Arc::clone(route))))
            .collect();

        let mut resolution_order: Vec<(MatchKey, Entry)> = routes
            .iter()
            .map(|(k, r)| (k.clone(), Entry::Route(Arc::clone(r))))
            .chain(aggregates.iter().map(|(k, a)| (k.clone(), Entry::Aggregate(Arc::clone(a)))))
            .collect();
        resolution_order.sort_by(|(ka, a), (kb, b)| {
            entry_specificity(a)
                .cmp(&entry_specificity(b))
                .then_with(|| ka.cmp(kb))
        });

        Self {
            version,
            routes,
            aggregates,
            by_key,
            resolution_order: resolution_order.into_iter().map(|(_, e)| e).collect(),
            report,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn report(&self) -> &AggregationReport {
        &self.report
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
        self.routes.values()
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &Arc<AggregateRouteDefinition>> {
        self.aggregates.values()
    }

    /// Look up a route by its aggregate-facing key.
    pub fn route_by_key(&self, key: &str) -> Option<&Arc<RouteDefinition>> {
        self.by_key.get(key)
    }

    /// Find the most specific entry matching the request.
    pub fn resolve(&self, method: &Method, host: Option<&str>, path: &str) -> Option<Resolution> {
        self.resolution_order.iter().find_map(|entry| match entry {
            Entry::Route(route) => route
                .upstream
                .matches(method, host, path)
                .map(|params| Resolution::Route {
                    route: Arc::clone(route),
                    params,
                }),
            Entry::Aggregate(aggregate) => aggregate
                .upstream
                .matches(method, host, path)
                .map(|params| Resolution::Aggregate {
                    aggregate: Arc::clone(aggregate),
                    params,
                }),
        })
    }

    pub fn contents(&self) -> TableContents<'_> {
        TableContents {
            routes: self.routes.values().map(Arc::as_ref).collect(),
            aggregates: self.aggregates.values().map(Arc::as_ref).collect(),
        }
    }
}

fn entry_specificity(entry: &Entry) -> (bool, (bool, std::cmp::Reverse<usize>, usize)) {
    match entry {
        Entry::Route(route) => route.upstream.specificity(),
        Entry::Aggregate(aggregate) => aggregate.upstream.specificity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FragmentGlobals, RouteDefaults, RouteSpec};
    use crate::routing::route::EffectiveDefaults;

    fn route(method: &str, upstream: &str, host: Option<&str>, downstream: &str) -> RouteDefinition {
        let spec = RouteSpec {
            key: None,
            method: method.into(),
            upstream_path: upstream.into(),
            upstream_host: host.map(Into::into),
            downstream_path: downstream.into(),
            downstream_hosts: vec!["svc:80".into()],
            scheme: None,
            load_balancer: None,
            timeout_ms: None,
            retry: None,
            circuit_breaker: None,
            is_override: false,
        };
        let defaults = EffectiveDefaults::layer(&RouteDefaults::default(), &FragmentGlobals::default());
        RouteDefinition::from_spec(&spec, &"t.toml".into(), &defaults).unwrap()
    }

    fn table(routes: Vec<RouteDefinition>) -> RoutingTable {
        let routes = routes.into_iter().map(|r| (r.upstream.key(), r)).collect();
        RoutingTable::build(1, routes, BTreeMap::new(), AggregationReport::default())
    }

    fn downstream_of(resolution: Option<Resolution>) -> String {
        match resolution {
            Some(Resolution::Route { route, .. }) => route.downstream.path.to_string(),
            other => panic!("expected route, got {other:?}"),
        }
    }

    #[test]
    fn test_most_specific_route_wins() {
        let t = table(vec![
            route("GET", "/{*rest}", None, "/fallback/{*rest}"),
            route("GET", "/users/{id}", None, "/by-id/{id}"),
            route("GET", "/users/me", None, "/me"),
        ]);

        assert_eq!(downstream_of(t.resolve(&Method::GET, None, "/users/me")), "/me");
        assert_eq!(downstream_of(t.resolve(&Method::GET, None, "/users/7")), "/by-id/{id}");
        assert_eq!(downstream_of(t.resolve(&Method::GET, None, "/other/thing")), "/fallback/{*rest}");
    }

    #[test]
    fn test_host_bound_route_checked_first() {
        let t = table(vec![
            route("GET", "/users", None, "/any"),
            route("GET", "/users", Some("api.example.com"), "/api"),
        ]);

        assert_eq!(downstream_of(t.resolve(&Method::GET, Some("API.example.com"), "/users")), "/api");
        assert_eq!(downstream_of(t.resolve(&Method::GET, Some("www.example.com"), "/users")), "/any");
    }

    #[test]
    fn test_method_must_match() {
        let t = table(vec![route("POST", "/orders", None, "/orders")]);
        assert!(t.resolve(&Method::GET, None, "/orders").is_none());
        assert!(t.resolve(&Method::POST, None, "/orders").is_some());
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        let t = RoutingTable::empty();
        assert_eq!(t.version(), 0);
        assert!(t.resolve(&Method::GET, None, "/").is_none());
    }
}
