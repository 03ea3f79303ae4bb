//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! FragmentStore listing
//!     → aggregator.rs (validate entries, resolve collisions, stamp version)
//!     → table.rs (immutable RoutingTable)
//!     → reloader.rs (ArcSwap publish, debounced on store events)
//!
//! Incoming request (method, host, path)
//!     → Reloader::current() (one snapshot per request)
//!     → RoutingTable::resolve()
//!     → Route | Aggregate | None
//! ```
//!
//! # Design Decisions
//! - Tables are never mutated; a change publishes a new table
//! - No regex in the hot path (segment matching only)
//! - Deterministic: the same fragment set always yields the same table contents

pub mod aggregator;
pub mod matcher;
pub mod reloader;
pub mod route;
pub mod table;

pub use aggregator::{AggregationError, AggregationIssue, AggregationReport, ConfigAggregator, MergeOutcome};
pub use matcher::{Params, PathTemplate};
pub use reloader::Reloader;
pub use route::{AggregateRouteDefinition, LoadBalancerHint, MatchKey, RouteDefinition};
pub use table::{Resolution, RoutingTable};
