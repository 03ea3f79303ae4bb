//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: downstream assumed down, calls fail fast
//! - Half-Open: one trial call tests whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failures_before_break
//! Open → Half-Open: after break_duration
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - Per-route circuit breaker, keyed by route label so reloads keep state
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open (prevents hammering a recovering downstream)
//! - A permit dropped without an outcome (cancelled call) counts as a failure

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::aggregation::result::{BranchFailure, DownstreamResponse};
use crate::http::client::{DownstreamClient, DownstreamRequest};
use crate::resilience::timeouts::bounded_call;
use crate::routing::route::RouteDefinition;

/// Breaker settings of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerPolicy {
    pub failures_before_break: u32,
    #[serde(rename = "break_duration_ms", serialize_with = "millis")]
    pub break_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state; an expired Open reads as Half-Open.
    pub fn state(&self) -> BreakerState {
        match &*self.lock() {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { until } if Instant::now() < *until => BreakerState::Open,
            State::Open { .. } | State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Ask to make one call. `None` means fail fast.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut state = self.lock();
        match &mut *state {
            State::Closed { .. } => {}
            State::Open { until } => {
                if Instant::now() < *until {
                    return None;
                }
                *state = State::HalfOpen { trial_in_flight: true };
            }
            State::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    return None;
                }
                *trial_in_flight = true;
            }
        }
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            settled: false,
        })
    }

    fn on_success(&self) {
        *self.lock() = State::Closed { failures: 0 };
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        let trip = match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                *failures >= self.policy.failures_before_break
            }
            State::HalfOpen { .. } => true,
            // A call admitted before the trip finished late.
            State::Open { .. } => false,
        };
        if trip {
            tracing::warn!(
                break_ms = self.policy.break_duration.as_millis() as u64,
                "Circuit breaker opened"
            );
            *state = State::Open {
                until: Instant::now() + self.policy.break_duration,
            };
        }
    }
}

/// Admission for one call; report its outcome with [`BreakerPermit::record`].
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl BreakerPermit {
    pub fn record(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success();
        } else {
            self.breaker.on_failure();
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure();
        }
    }
}

/// Breakers for every route, keyed by route label.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakers {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The route's breaker. A changed policy starts a fresh, closed breaker.
    pub fn for_route(&self, route: &str, policy: BreakerPolicy) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(route) {
            if existing.policy() == policy {
                return Arc::clone(existing.value());
            }
        }
        let breaker = Arc::new(CircuitBreaker::new(policy));
        self.breakers.insert(route.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn state(&self, route: &str) -> Option<BreakerState> {
        self.breakers.get(route).map(|b| b.state())
    }
}

/// Call `route` through its breaker (if it has one), retries and timeout.
///
/// Timeouts, connection failures and 5xx responses count against the breaker.
pub async fn guarded_call(
    client: Arc<dyn DownstreamClient>,
    breakers: &CircuitBreakers,
    route: &RouteDefinition,
    request: DownstreamRequest,
) -> Result<DownstreamResponse, BranchFailure> {
    let Some(policy) = route.circuit_breaker else {
        return bounded_call(client, request, route.timeout, route.retry).await;
    };

    let label = route.label();
    let Some(permit) = breakers.for_route(&label, policy).try_acquire() else {
        tracing::debug!(route = %label, "Circuit open, failing fast");
        return Err(BranchFailure::CircuitOpen);
    };

    let outcome = bounded_call(client, request, route.timeout, route.retry).await;
    let healthy = match &outcome {
        Ok(response) => !response.status.is_server_error(),
        Err(_) => false,
    };
    permit.record(healthy);
    outcome
}

fn millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: BreakerPolicy = BreakerPolicy {
        failures_before_break: 2,
        break_duration: Duration::from_secs(10),
    };

    fn fail(breaker: &Arc<CircuitBreaker>) {
        breaker.try_acquire().unwrap().record(false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let breaker = Arc::new(CircuitBreaker::new(POLICY));
        fail(&breaker);
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&breaker);

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = Arc::new(CircuitBreaker::new(POLICY));
        fail(&breaker);
        breaker.try_acquire().unwrap().record(true);
        fail(&breaker);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial_then_closes() {
        let breaker = Arc::new(CircuitBreaker::new(POLICY));
        fail(&breaker);
        fail(&breaker);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let trial = breaker.try_acquire().expect("trial admitted");
        assert!(breaker.try_acquire().is_none(), "only one trial at a time");
        trial.record(true);

        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = Arc::new(CircuitBreaker::new(POLICY));
        fail(&breaker);
        fail(&breaker);
        tokio::time::advance(Duration::from_secs(10)).await;

        fail(&breaker);

        assert_eq!(breaker.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(breaker.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_counts_as_failure() {
        let breaker = Arc::new(CircuitBreaker::new(POLICY));
        fail(&breaker);
        fail(&breaker);
        tokio::time::advance(Duration::from_secs(10)).await;

        drop(breaker.try_acquire().unwrap());

        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_registry_keeps_state_per_route_and_resets_on_policy_change() {
        let breakers = CircuitBreakers::new();
        let a = breakers.for_route("orders", POLICY);
        assert!(Arc::ptr_eq(&a, &breakers.for_route("orders", POLICY)));
        assert!(breakers.state("profile").is_none());

        let changed = BreakerPolicy {
            failures_before_break: 5,
            ..POLICY
        };
        assert!(!Arc::ptr_eq(&a, &breakers.for_route("orders", changed)));
    }
}
