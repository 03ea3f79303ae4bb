//! Downstream host selection.
//!
//! # Data Flow
//! ```text
//! Downstream call for route R (hosts, LoadBalancerHint)
//!     → pool.rs (per-route selector state)
//!     → Apply the hinted algorithm:
//!         - NoLoadBalancer: first host
//!         - round_robin.rs: rotate through hosts
//!     → Return the host to dial
//! ```
//!
//! # Design Decisions
//! - Route definitions only carry a hint; selection state lives here
//! - Selector state is keyed by route, so reloads keep rotation going
//! - No health tracking: a failing host is retried on the next rotation

pub mod pool;
pub mod round_robin;

use crate::routing::route::HostAndPort;

pub use pool::HostSelectors;
pub use round_robin::RoundRobin;

/// Picks one host out of a route's candidates.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_host<'a>(&self, hosts: &'a [HostAndPort]) -> Option<&'a HostAndPort>;
}

/// Always the first host.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstHost;

impl LoadBalancer for FirstHost {
    fn next_host<'a>(&self, hosts: &'a [HostAndPort]) -> Option<&'a HostAndPort> {
        hosts.first()
    }
}
