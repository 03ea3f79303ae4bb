//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::LoadBalancer;
use crate::routing::route::HostAndPort;

/// Round-robin selector.
/// Stores an internal counter to rotate through hosts.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_host<'a>(&self, hosts: &'a [HostAndPort]) -> Option<&'a HostAndPort> {
        if hosts.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        hosts.get(index)
    }
}
