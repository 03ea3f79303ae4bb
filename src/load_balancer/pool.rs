//! Per-route selector state.
//!
//! # Responsibilities
//! - Keep one rotating selector per route label
//! - Apply the route's load-balancer hint to pick a host

use std::sync::Arc;
use dashmap::DashMap;

use crate::load_balancer::{FirstHost, LoadBalancer, RoundRobin};
use crate::routing::route::{HostAndPort, LoadBalancerHint};

/// Selectors shared by every call made through one downstream client.
#[derive(Debug, Default, Clone)]
pub struct HostSelectors {
    round_robin: Arc<DashMap<String, Arc<RoundRobin>>>,
}

impl HostSelectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a host for `route` according to `hint`.
    pub fn select(&self, route: &str, hint: LoadBalancerHint, hosts: &[HostAndPort]) -> Option<HostAndPort> {
        match hint {
            LoadBalancerHint::NoLoadBalancer => FirstHost.next_host(hosts).cloned(),
            LoadBalancerHint::RoundRobin => {
                let selector = match self.round_robin.get(route) {
                    Some(existing) => Arc::clone(existing.value()),
                    None => Arc::clone(self.round_robin.entry(route.to_string()).or_default().value()),
                };
                selector.next_host(hosts).cloned()
            }
        }
    }

    /// Number of routes with rotation state.
    pub fn tracked_routes(&self) -> usize {
        self.round_robin.len()
    }
}
