//! Merging fragments into one routing table.
//!
//! # Responsibilities
//! - Compile every fragment entry independently; bad entries are reported, not fatal
//! - Resolve collisions between fragments with a deterministic ranking
//! - Validate aggregate routes against the merged route set
//! - Stamp each table with a strictly increasing version
//!
//! # Collision ranking (highest wins)
//! 1. `override = true` on the route
//! 2. fragment `precedence`
//! 3. fragment id, lexically later wins
//! 4. earlier declaration within the same fragment
//!
//! The ranking never depends on the order fragments are supplied in.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use thiserror::Error;

use crate::aggregation::strategy::StrategyRegistry;
use crate::config::schema::RouteDefaults;
use crate::fragments::{ConfigFragment, FragmentId, LoadedFragment, StoreError};
use crate::observability::metrics;
use crate::routing::route::{AggregateRouteDefinition, EffectiveDefaults, MatchKey, RouteDefinition};
use crate::routing::table::RoutingTable;

/// A non-fatal problem found while merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationIssue {
    #[error("fragment {fragment} rejected: {reason}")]
    FragmentRejected { fragment: FragmentId, reason: String },

    #[error("route #{index} in {fragment} is invalid: {reason}")]
    InvalidRoute { fragment: FragmentId, index: usize, reason: String },

    #[error("aggregate #{index} in {fragment} is invalid: {reason}")]
    InvalidAggregate { fragment: FragmentId, index: usize, reason: String },

    #[error("route {match_key} from {loser} shadowed by {winner} ({cause})")]
    RouteShadowed {
        match_key: String,
        route_key: Option<String>,
        cause: ShadowCause,
        winner: FragmentId,
        loser: FragmentId,
    },

    #[error("aggregate {match_key} from {loser} shadowed by {winner}")]
    AggregateShadowed { match_key: String, winner: FragmentId, loser: FragmentId },

    #[error("aggregate {match_key} from {fragment} collides with a route from {route_source}")]
    AggregateConflict { match_key: String, fragment: FragmentId, route_source: FragmentId },

    #[error("aggregate {match_key} from {fragment} references unknown routes {missing:?}")]
    AggregateUnresolved { match_key: String, fragment: FragmentId, missing: Vec<String> },

    #[error("aggregate {match_key} from {fragment} uses unknown merge strategy {strategy:?}")]
    MergeStrategyUnknown { match_key: String, fragment: FragmentId, strategy: String },

    #[error("aggregate {match_key} from {fragment} does not capture {{{placeholder}}} needed by route {route}")]
    AggregateUnboundPlaceholder {
        match_key: String,
        fragment: FragmentId,
        route: String,
        placeholder: String,
    },
}

impl AggregationIssue {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AggregationIssue::FragmentRejected { .. } => "fragment_rejected",
            AggregationIssue::InvalidRoute { .. } => "invalid_route",
            AggregationIssue::InvalidAggregate { .. } => "invalid_aggregate",
            AggregationIssue::RouteShadowed { .. } => "route_shadowed",
            AggregationIssue::AggregateShadowed { .. } => "aggregate_shadowed",
            AggregationIssue::AggregateConflict { .. } => "aggregate_conflict",
            AggregationIssue::AggregateUnresolved { .. } => "aggregate_unresolved",
            AggregationIssue::MergeStrategyUnknown { .. } => "merge_strategy_unknown",
            AggregationIssue::AggregateUnboundPlaceholder { .. } => "aggregate_unbound_placeholder",
        }
    }

    /// Shadowing is expected when fragments override each other.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AggregationIssue::RouteShadowed { .. } | AggregationIssue::AggregateShadowed { .. }
        )
    }
}

/// Which identity two routes collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowCause {
    MatchKey,
    RouteKey,
}

impl std::fmt::Display for ShadowCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowCause::MatchKey => f.write_str("same upstream match"),
            ShadowCause::RouteKey => f.write_str("same route key"),
        }
    }
}

/// Everything a merge pass had to say about its input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    pub accepted_fragments: Vec<FragmentId>,
    pub issues: Vec<AggregationIssue>,
}

impl AggregationReport {
    fn push(&mut self, issue: AggregationIssue) {
        self.issues.push(issue);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &AggregationIssue> {
        self.issues.iter().filter(|i| i.is_warning())
    }

    pub fn errors(&self) -> impl Iterator<Item = &AggregationIssue> {
        self.issues.iter().filter(|i| !i.is_warning())
    }

    /// Emit one structured event per issue.
    pub fn log(&self) {
        for issue in &self.issues {
            metrics::record_aggregation_issue(issue.kind());
            if issue.is_warning() {
                tracing::warn!(kind = issue.kind(), "{}", issue);
            } else {
                tracing::error!(kind = issue.kind(), "{}", issue);
            }
        }
    }
}

/// A merge pass that could not produce a table.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no valid fragments to aggregate ({} rejected)", .report.issues.len())]
    NoValidFragments { report: AggregationReport },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fragment listing task failed: {0}")]
    Listing(String),
}

/// A successful merge.
#[derive(Debug)]
pub struct MergeOutcome {
    pub table: RoutingTable,
}

impl MergeOutcome {
    pub fn report(&self) -> &AggregationReport {
        self.table.report()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    is_override: bool,
    precedence: i32,
    fragment: FragmentId,
    declaration: Reverse<usize>,
}

impl Rank {
    fn new(fragment: &ConfigFragment, is_override: bool, declaration: usize) -> Self {
        Self {
            is_override,
            precedence: fragment.precedence(),
            fragment: fragment.id.clone(),
            declaration: Reverse(declaration),
        }
    }
}

struct Candidate<T> {
    rank: Rank,
    definition: T,
}

fn by_rank_desc<T>(a: &Candidate<T>, b: &Candidate<T>) -> CmpOrdering {
    b.rank.cmp(&a.rank)
}

/// Merges fragment sets into routing tables.
#[derive(Debug)]
pub struct ConfigAggregator {
    defaults: RouteDefaults,
    strategies: Arc<StrategyRegistry>,
    request_timeout: Option<Duration>,
    last_version: AtomicU64,
}

impl ConfigAggregator {
    pub fn new(defaults: RouteDefaults, strategies: Arc<StrategyRegistry>) -> Self {
        Self {
            defaults,
            strategies,
            request_timeout: None,
            last_version: AtomicU64::new(0),
        }
    }

    /// Reject routes and aggregates whose timeout would not fire before
    /// the client request timeout.
    pub fn with_request_timeout(mut self, limit: Duration) -> Self {
        self.request_timeout = Some(limit);
        self
    }

    pub fn strategies(&self) -> &Arc<StrategyRegistry> {
        &self.strategies
    }

    /// Version of the most recently produced table (0 before the first).
    pub fn last_version(&self) -> u64 {
        self.last_version.load(Ordering::SeqCst)
    }

    /// Merge a fragment listing into a new table.
    pub fn merge(&self, fragments: &[LoadedFragment]) -> Result<MergeOutcome, AggregationError> {
        let mut report = AggregationReport::default();
        let mut route_candidates = Vec::new();
        let mut aggregate_candidates = Vec::new();

        // 1. Compile each fragment on its own
        for loaded in fragments {
            let fragment = match loaded {
                Ok(fragment) => fragment,
                Err(e) => {
                    report.push(AggregationIssue::FragmentRejected {
                        fragment: e.fragment.clone(),
                        reason: e.kind.to_string(),
                    });
                    continue;
                }
            };
            report.accepted_fragments.push(fragment.id.clone());
            let defaults = EffectiveDefaults::layer(&self.defaults, &fragment.document.globals)
                .within_request_timeout(self.request_timeout);

            for (index, spec) in fragment.document.routes.iter().enumerate() {
                match RouteDefinition::from_spec(spec, &fragment.id, &defaults) {
                    Ok(definition) => route_candidates.push(Candidate {
                        rank: Rank::new(fragment, definition.is_override, index),
                        definition,
                    }),
                    Err(e) => report.push(AggregationIssue::InvalidRoute {
                        fragment: fragment.id.clone(),
                        index,
                        reason: e.to_string(),
                    }),
                }
            }

            for (index, spec) in fragment.document.aggregates.iter().enumerate() {
                match AggregateRouteDefinition::from_spec(spec, &fragment.id, &defaults) {
                    Ok(definition) => aggregate_candidates.push(Candidate {
                        rank: Rank::new(fragment, false, index),
                        definition,
                    }),
                    Err(e) => report.push(AggregationIssue::InvalidAggregate {
                        fragment: fragment.id.clone(),
                        index,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        if report.accepted_fragments.is_empty() {
            return Err(AggregationError::NoValidFragments { report });
        }
        report.accepted_fragments.sort();

        // 2. Union of routes, highest rank first
        route_candidates.sort_by(by_rank_desc);
        let mut routes: BTreeMap<MatchKey, RouteDefinition> = BTreeMap::new();
        let mut route_keys: HashMap<String, MatchKey> = HashMap::new();

        for Candidate { definition, .. } in route_candidates {
            let match_key = definition.upstream.key();

            let collision = routes
                .get(&match_key)
                .map(|winner| (winner, ShadowCause::MatchKey))
                .or_else(|| {
                    definition
                        .key
                        .as_ref()
                        .and_then(|k| route_keys.get(k))
                        .and_then(|winner_key| routes.get(winner_key))
                        .map(|winner| (winner, ShadowCause::RouteKey))
                });

            if let Some((winner, cause)) = collision {
                report.push(AggregationIssue::RouteShadowed {
                    match_key: match_key.to_string(),
                    route_key: definition.key.clone(),
                    cause,
                    winner: winner.source.clone(),
                    loser: definition.source.clone(),
                });
                continue;
            }

            if let Some(key) = &definition.key {
                route_keys.insert(key.clone(), match_key.clone());
            }
            routes.insert(match_key, definition);
        }

        // 3. Aggregates: validate against the union, then dedupe the survivors
        aggregate_candidates.sort_by(by_rank_desc);
        let mut aggregates: BTreeMap<MatchKey, AggregateRouteDefinition> = BTreeMap::new();

        for Candidate { definition, .. } in aggregate_candidates {
            let match_key = definition.upstream.key();

            if let Some(route) = routes.get(&match_key) {
                report.push(AggregationIssue::AggregateConflict {
                    match_key: match_key.to_string(),
                    fragment: definition.source.clone(),
                    route_source: route.source.clone(),
                });
                continue;
            }

            let missing: Vec<String> = definition
                .route_keys
                .iter()
                .filter(|k| !route_keys.contains_key(*k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                report.push(AggregationIssue::AggregateUnresolved {
                    match_key: match_key.to_string(),
                    fragment: definition.source.clone(),
                    missing,
                });
                continue;
            }

            // Constituents render their downstream path from the aggregate's captures
            let unbound = definition.route_keys.iter().find_map(|key| {
                let route = route_keys.get(key).and_then(|mk| routes.get(mk))?;
                route
                    .downstream
                    .path
                    .placeholders()
                    .find(|name| !definition.upstream.path.placeholders().any(|bound| bound == *name))
                    .map(|name| (key.clone(), name.to_string()))
            });
            if let Some((route, placeholder)) = unbound {
                report.push(AggregationIssue::AggregateUnboundPlaceholder {
                    match_key: match_key.to_string(),
                    fragment: definition.source.clone(),
                    route,
                    placeholder,
                });
                continue;
            }

            if !self.strategies.contains(&definition.strategy) {
                report.push(AggregationIssue::MergeStrategyUnknown {
                    match_key: match_key.to_string(),
                    fragment: definition.source.clone(),
                    strategy: definition.strategy.clone(),
                });
                continue;
            }

            if let Some(winner) = aggregates.get(&match_key) {
                report.push(AggregationIssue::AggregateShadowed {
                    match_key: match_key.to_string(),
                    winner: winner.source.clone(),
                    loser: definition.source.clone(),
                });
                continue;
            }

            aggregates.insert(match_key, definition);
        }

        // 4. Stamp
        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        let table = RoutingTable::build(version, routes, aggregates, report);

        tracing::debug!(
            version,
            routes = table.route_count(),
            aggregates = table.aggregate_count(),
            issues = table.report().issues.len(),
            "Fragments merged"
        );

        Ok(MergeOutcome { table })
    }
}
