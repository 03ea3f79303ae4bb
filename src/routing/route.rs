//! Route definitions compiled from fragment entries.
//!
//! A [`RouteDefinition`] or [`AggregateRouteDefinition`] is built once from
//! its fragment entry plus the effective defaults, and never changes after.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use axum::http::Method;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::schema::{AggregateSpec, CircuitBreakerSpec, FragmentGlobals, RetrySpec, RouteDefaults, RouteSpec};
use crate::config::validation::{check_retry, is_supported_scheme, ValidationError};
use crate::fragments::FragmentId;
use crate::resilience::circuit_breaker::BreakerPolicy;
use crate::routing::matcher::{HostMatcher, Params, PathTemplate, TemplateError};

/// Strategy used when an aggregate doesn't name one.
pub const DEFAULT_STRATEGY: &str = "structural";

/// Why a single route or aggregate entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("unknown HTTP method {0:?}")]
    UnknownMethod(String),

    #[error("no downstream hosts")]
    NoHosts,

    #[error("invalid downstream host {0:?}, expected host:port")]
    InvalidHost(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("unknown load balancer {0:?}")]
    UnknownLoadBalancer(String),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("timeout of {timeout_ms} ms is not below the {limit_ms} ms request timeout")]
    TimeoutExceedsRequest { timeout_ms: u64, limit_ms: u64 },

    #[error("circuit breaker break_duration_ms must be greater than zero")]
    ZeroBreakDuration,

    #[error("downstream placeholder {0:?} is not bound by the upstream template")]
    UnboundPlaceholder(String),

    #[error("route key must not be empty")]
    EmptyKey,

    #[error("aggregate has no constituent routes")]
    NoConstituents,

    #[error("constituent {0:?} listed more than once")]
    DuplicateConstituent(String),

    #[error(transparent)]
    Retry(#[from] ValidationError),
}

/// Identity used to detect collisions: method, template shape and host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchKey {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{} {}{}", self.method, host, self.path),
            None => write!(f, "{} {}", self.method, self.path),
        }
    }
}

/// The client-facing side of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMatch {
    pub method: String,
    #[serde(serialize_with = "display")]
    pub path: PathTemplate,
    #[serde(serialize_with = "host_matcher")]
    pub host: Option<HostMatcher>,
}

impl UpstreamMatch {
    fn parse(method: &str, path: &str, host: Option<&str>) -> Result<Self, RouteError> {
        let method = Method::from_str(&method.to_uppercase())
            .map_err(|_| RouteError::UnknownMethod(method.to_string()))?;
        Ok(Self {
            method: method.as_str().to_string(),
            path: PathTemplate::parse(path)?,
            host: host.map(HostMatcher::new),
        })
    }

    pub fn key(&self) -> MatchKey {
        MatchKey {
            method: self.method.clone(),
            path: self.path.shape(),
            host: self.host.as_ref().map(|h| h.host().to_string()),
        }
    }

    pub fn matches(&self, method: &Method, host: Option<&str>, path: &str) -> Option<Params> {
        if self.method != method.as_str() {
            return None;
        }
        if let Some(expected) = &self.host {
            if !expected.matches(host) {
                return None;
            }
        }
        self.path.match_path(path)
    }

    /// Sort key for resolution: host-bound first, then the template's own specificity.
    pub fn specificity(&self) -> (bool, (bool, std::cmp::Reverse<usize>, usize)) {
        (self.host.is_none(), self.path.specificity())
    }
}

/// A downstream `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl FromStr for HostAndPort {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RouteError::InvalidHost(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains('/') {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Serialize for HostAndPort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How the downstream client should spread calls over a route's hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerHint {
    #[default]
    NoLoadBalancer,
    RoundRobin,
}

impl FromStr for LoadBalancerHint {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
        match normalized.to_lowercase().as_str() {
            "noloadbalancer" | "none" => Ok(Self::NoLoadBalancer),
            "roundrobin" => Ok(Self::RoundRobin),
            _ => Err(RouteError::UnknownLoadBalancer(s.to_string())),
        }
    }
}

/// Where a route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamTarget {
    pub scheme: String,
    pub hosts: Vec<HostAndPort>,
    #[serde(serialize_with = "display")]
    pub path: PathTemplate,
}

/// Retry behavior for one downstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&RetrySpec> for RetryPolicy {
    fn from(spec: &RetrySpec) -> Self {
        Self {
            max_attempts: spec.max_attempts,
            base_delay_ms: spec.base_delay_ms,
            max_delay_ms: spec.max_delay_ms,
        }
    }
}

/// Defaults after layering fragment globals over gateway defaults.
#[derive(Debug, Clone)]
pub struct EffectiveDefaults {
    pub timeout_ms: u64,
    pub aggregate_timeout_ms: u64,
    pub scheme: String,
    pub retry: RetrySpec,
    pub circuit_breaker: CircuitBreakerSpec,
    /// Ceiling every route and aggregate timeout must stay below.
    pub request_timeout_ms: Option<u64>,
}

impl EffectiveDefaults {
    pub fn layer(gateway: &RouteDefaults, fragment: &FragmentGlobals) -> Self {
        Self {
            timeout_ms: fragment.timeout_ms.unwrap_or(gateway.timeout_ms),
            aggregate_timeout_ms: fragment.aggregate_timeout_ms.unwrap_or(gateway.aggregate_timeout_ms),
            scheme: fragment.scheme.clone().unwrap_or_else(|| gateway.scheme.clone()),
            retry: fragment.retry.clone().unwrap_or_else(|| gateway.retry.clone()),
            circuit_breaker: fragment
                .circuit_breaker
                .clone()
                .unwrap_or_else(|| gateway.circuit_breaker.clone()),
            request_timeout_ms: None,
        }
    }

    /// Require timeouts to stay below the client request timeout.
    pub fn within_request_timeout(mut self, limit: Option<Duration>) -> Self {
        self.request_timeout_ms = limit.map(|l| l.as_millis() as u64);
        self
    }

    fn check_timeout(&self, timeout_ms: u64) -> Result<Duration, RouteError> {
        if timeout_ms == 0 {
            return Err(RouteError::ZeroTimeout);
        }
        if let Some(limit_ms) = self.request_timeout_ms {
            if timeout_ms >= limit_ms {
                return Err(RouteError::TimeoutExceedsRequest { timeout_ms, limit_ms });
            }
        }
        Ok(Duration::from_millis(timeout_ms))
    }
}

fn breaker_policy(spec: &CircuitBreakerSpec) -> Result<Option<BreakerPolicy>, RouteError> {
    if spec.failures_before_break == 0 {
        return Ok(None);
    }
    if spec.break_duration_ms == 0 {
        return Err(RouteError::ZeroBreakDuration);
    }
    Ok(Some(BreakerPolicy {
        failures_before_break: spec.failures_before_break,
        break_duration: Duration::from_millis(spec.break_duration_ms),
    }))
}

/// A single downstream mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDefinition {
    pub key: Option<String>,
    pub upstream: UpstreamMatch,
    pub downstream: DownstreamTarget,
    pub load_balancer: LoadBalancerHint,
    #[serde(rename = "timeout_ms", serialize_with = "millis")]
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit_breaker: Option<BreakerPolicy>,
    #[serde(rename = "override")]
    pub is_override: bool,
    pub source: FragmentId,
}

impl RouteDefinition {
    pub fn from_spec(spec: &RouteSpec, source: &FragmentId, defaults: &EffectiveDefaults) -> Result<Self, RouteError> {
        if spec.key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(RouteError::EmptyKey);
        }

        let upstream = UpstreamMatch::parse(&spec.method, &spec.upstream_path, spec.upstream_host.as_deref())?;
        let downstream_path = PathTemplate::parse(&spec.downstream_path)?;
        if let Some(unbound) = downstream_path
            .placeholders()
            .find(|name| !upstream.path.placeholders().any(|p| p == *name))
        {
            return Err(RouteError::UnboundPlaceholder(unbound.to_string()));
        }

        if spec.downstream_hosts.is_empty() {
            return Err(RouteError::NoHosts);
        }
        let hosts = spec
            .downstream_hosts
            .iter()
            .map(|h| h.parse())
            .collect::<Result<Vec<HostAndPort>, _>>()?;

        let scheme = spec.scheme.clone().unwrap_or_else(|| defaults.scheme.clone()).to_lowercase();
        if !is_supported_scheme(&scheme) {
            return Err(RouteError::UnsupportedScheme(scheme));
        }

        let load_balancer = match &spec.load_balancer {
            Some(name) => name.parse()?,
            None => LoadBalancerHint::default(),
        };

        let timeout = defaults.check_timeout(spec.timeout_ms.unwrap_or(defaults.timeout_ms))?;
        let circuit_breaker = breaker_policy(spec.circuit_breaker.as_ref().unwrap_or(&defaults.circuit_breaker))?;

        let retry = spec.retry.as_ref().unwrap_or(&defaults.retry);
        let mut retry_errors = Vec::new();
        check_retry(&mut retry_errors, "retry", retry);
        if let Some(err) = retry_errors.into_iter().next() {
            return Err(err.into());
        }

        Ok(Self {
            key: spec.key.clone(),
            upstream,
            downstream: DownstreamTarget {
                scheme,
                hosts,
                path: downstream_path,
            },
            load_balancer,
            timeout,
            retry: RetryPolicy::from(retry),
            circuit_breaker,
            is_override: spec.is_override,
            source: source.clone(),
        })
    }

    /// Name used in logs and metrics.
    pub fn label(&self) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => self.upstream.key().to_string(),
        }
    }
}

/// A client-facing endpoint composed from several routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRouteDefinition {
    pub upstream: UpstreamMatch,
    pub route_keys: Vec<String>,
    pub strategy: String,
    #[serde(rename = "timeout_ms", serialize_with = "millis")]
    pub timeout: Duration,
    pub source: FragmentId,
}

impl AggregateRouteDefinition {
    pub fn from_spec(spec: &AggregateSpec, source: &FragmentId, defaults: &EffectiveDefaults) -> Result<Self, RouteError> {
        let upstream = UpstreamMatch::parse(&spec.method, &spec.upstream_path, spec.upstream_host.as_deref())?;

        if spec.routes.is_empty() {
            return Err(RouteError::NoConstituents);
        }
        for (index, key) in spec.routes.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(RouteError::EmptyKey);
            }
            if spec.routes[..index].contains(key) {
                return Err(RouteError::DuplicateConstituent(key.clone()));
            }
        }

        let timeout = defaults.check_timeout(spec.timeout_ms.unwrap_or(defaults.aggregate_timeout_ms))?;

        Ok(Self {
            upstream,
            route_keys: spec.routes.clone(),
            strategy: spec.strategy.clone().unwrap_or_else(|| DEFAULT_STRATEGY.to_string()),
            timeout,
            source: source.clone(),
        })
    }
}

fn display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn host_matcher<S: Serializer>(value: &Option<HostMatcher>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(matcher) => serializer.serialize_some(matcher.host()),
        None => serializer.serialize_none(),
    }
}

fn millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(upstream: &str, downstream: &str) -> RouteSpec {
        RouteSpec {
            key: Some("users".into()),
            method: "get".into(),
            upstream_path: upstream.into(),
            upstream_host: None,
            downstream_path: downstream.into(),
            downstream_hosts: vec!["svc-users:8080".into()],
            scheme: None,
            load_balancer: None,
            timeout_ms: None,
            retry: None,
            circuit_breaker: None,
            is_override: false,
        }
    }

    fn defaults() -> EffectiveDefaults {
        EffectiveDefaults::layer(&RouteDefaults::default(), &FragmentGlobals::default())
    }

    #[test]
    fn test_route_from_spec_applies_defaults() {
        let route = RouteDefinition::from_spec(&spec("/users/{id}", "/api/users/{id}"), &"a.toml".into(), &defaults())
            .unwrap();

        assert_eq!(route.upstream.method, "GET");
        assert_eq!(route.downstream.scheme, "http");
        assert_eq!(route.downstream.hosts[0].to_string(), "svc-users:8080");
        assert_eq!(route.timeout, Duration::from_millis(30_000));
        assert_eq!(route.load_balancer, LoadBalancerHint::NoLoadBalancer);
        assert_eq!(route.upstream.key().to_string(), "GET /users/{}");
    }

    #[test]
    fn test_fragment_globals_override_gateway_defaults() {
        let globals = FragmentGlobals {
            timeout_ms: Some(1200),
            scheme: Some("https".into()),
            ..FragmentGlobals::default()
        };
        let defaults = EffectiveDefaults::layer(&RouteDefaults::default(), &globals);
        let route = RouteDefinition::from_spec(&spec("/users", "/users"), &"a.toml".into(), &defaults).unwrap();

        assert_eq!(route.timeout, Duration::from_millis(1200));
        assert_eq!(route.downstream.scheme, "https");
    }

    #[test]
    fn test_route_rejections() {
        let d = defaults();
        let src: FragmentId = "a.toml".into();

        let err = RouteDefinition::from_spec(&spec("/users", "/users/{id}"), &src, &d).unwrap_err();
        assert_eq!(err, RouteError::UnboundPlaceholder("id".into()));

        let mut bad_host = spec("/users", "/users");
        bad_host.downstream_hosts = vec!["svc-users".into()];
        assert!(matches!(RouteDefinition::from_spec(&bad_host, &src, &d), Err(RouteError::InvalidHost(_))));

        let mut bad_method = spec("/users", "/users");
        bad_method.method = "FETCH THIS".into();
        assert!(matches!(RouteDefinition::from_spec(&bad_method, &src, &d), Err(RouteError::UnknownMethod(_))));

        let mut bad_lb = spec("/users", "/users");
        bad_lb.load_balancer = Some("random".into());
        assert!(matches!(RouteDefinition::from_spec(&bad_lb, &src, &d), Err(RouteError::UnknownLoadBalancer(_))));
    }

    #[test]
    fn test_load_balancer_names() {
        assert_eq!("RoundRobin".parse::<LoadBalancerHint>().unwrap(), LoadBalancerHint::RoundRobin);
        assert_eq!("round_robin".parse::<LoadBalancerHint>().unwrap(), LoadBalancerHint::RoundRobin);
        assert_eq!("NoLoadBalancer".parse::<LoadBalancerHint>().unwrap(), LoadBalancerHint::NoLoadBalancer);
    }

    #[test]
    fn test_aggregate_from_spec() {
        let spec = AggregateSpec {
            method: "GET".into(),
            upstream_path: "/dashboard".into(),
            upstream_host: None,
            routes: vec!["profile".into(), "orders".into()],
            strategy: None,
            timeout_ms: None,
        };
        let aggregate = AggregateRouteDefinition::from_spec(&spec, &"a.toml".into(), &defaults()).unwrap();
        assert_eq!(aggregate.strategy, DEFAULT_STRATEGY);
        assert_eq!(aggregate.timeout, Duration::from_millis(60_000));

        let duplicated = AggregateSpec {
            routes: vec!["profile".into(), "profile".into()],
            ..spec
        };
        assert_eq!(
            AggregateRouteDefinition::from_spec(&duplicated, &"a.toml".into(), &defaults()).unwrap_err(),
            RouteError::DuplicateConstituent("profile".into())
        );
    }

    #[test]
    fn test_timeouts_must_stay_below_request_timeout() {
        let limited = defaults().within_request_timeout(Some(Duration::from_secs(30)));
        let src: FragmentId = "a.toml".into();

        let mut route = spec("/users", "/users");
        route.timeout_ms = Some(30_000);
        assert_eq!(
            RouteDefinition::from_spec(&route, &src, &limited).unwrap_err(),
            RouteError::TimeoutExceedsRequest {
                timeout_ms: 30_000,
                limit_ms: 30_000
            }
        );
        route.timeout_ms = Some(29_999);
        assert!(RouteDefinition::from_spec(&route, &src, &limited).is_ok());

        let aggregate = AggregateSpec {
            method: "GET".into(),
            upstream_path: "/dashboard".into(),
            upstream_host: None,
            routes: vec!["profile".into()],
            strategy: None,
            timeout_ms: Some(45_000),
        };
        assert!(matches!(
            AggregateRouteDefinition::from_spec(&aggregate, &src, &limited),
            Err(RouteError::TimeoutExceedsRequest { limit_ms: 30_000, .. })
        ));
    }

    #[test]
    fn test_circuit_breaker_policy() {
        let src: FragmentId = "a.toml".into();
        let route = RouteDefinition::from_spec(&spec("/users", "/users"), &src, &defaults()).unwrap();
        assert_eq!(route.circuit_breaker, None);

        let mut guarded = spec("/users", "/users");
        guarded.circuit_breaker = Some(CircuitBreakerSpec {
            failures_before_break: 3,
            break_duration_ms: 5_000,
        });
        let route = RouteDefinition::from_spec(&guarded, &src, &defaults()).unwrap();
        assert_eq!(
            route.circuit_breaker,
            Some(BreakerPolicy {
                failures_before_break: 3,
                break_duration: Duration::from_secs(5),
            })
        );

        guarded.circuit_breaker = Some(CircuitBreakerSpec {
            failures_before_break: 3,
            break_duration_ms: 0,
        });
        assert_eq!(
            RouteDefinition::from_spec(&guarded, &src, &defaults()).unwrap_err(),
            RouteError::ZeroBreakDuration
        );
    }
}
