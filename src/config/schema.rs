//! Configuration schema definitions.
//!
//! Two documents live here: the gateway's own configuration file
//! ([`GatewayConfig`]) and the route fragment format ([`FragmentDocument`]).
//! All types derive Serde traits; fragments may be authored as TOML or JSON.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Where route fragments come from and how changes are coalesced.
    pub fragments: FragmentSourceConfig,

    /// Defaults applied to routes whose fragment doesn't override them.
    pub defaults: RouteDefaults,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest inbound body buffered for forwarding.
    pub max_body_bytes: usize,

    /// Hard ceiling on the whole client request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
            request_timeout_secs: 120,
        }
    }
}

/// Fragment source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FragmentSourceConfig {
    /// Directory holding `*.toml` / `*.json` fragments.
    pub directory: String,

    /// Window in milliseconds used to coalesce bursts of change events.
    pub debounce_ms: u64,

    /// Poll interval for watcher backends that poll.
    pub poll_interval_secs: u64,
}

impl Default for FragmentSourceConfig {
    fn default() -> Self {
        Self {
            directory: "./routes".to_string(),
            debounce_ms: 250,
            poll_interval_secs: 2,
        }
    }
}

/// Gateway-wide route defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteDefaults {
    /// Per-call downstream timeout in milliseconds.
    pub timeout_ms: u64,

    /// Bound on a whole aggregate fan-out in milliseconds.
    pub aggregate_timeout_ms: u64,

    /// Downstream scheme when a route doesn't name one.
    pub scheme: String,

    /// Retry policy for downstream calls.
    pub retry: RetrySpec,

    /// Circuit breaker for downstream calls (disabled by default).
    pub circuit_breaker: CircuitBreakerSpec,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            aggregate_timeout_ms: 60_000,
            scheme: "http".to_string(),
            retry: RetrySpec::default(),
            circuit_breaker: CircuitBreakerSpec::default(),
        }
    }
}

/// Retry settings as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySpec {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Circuit breaker settings as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSpec {
    /// Consecutive failed calls that open the breaker; 0 disables it.
    pub failures_before_break: u32,

    /// How long an open breaker fails calls fast, in milliseconds.
    pub break_duration_ms: u64,
}

impl Default for CircuitBreakerSpec {
    fn default() -> Self {
        Self {
            failures_before_break: 0,
            break_duration_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// One route fragment as authored on disk or in a key-value entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FragmentDocument {
    /// Higher precedence wins route collisions against other fragments.
    pub precedence: i32,

    /// Defaults for this fragment's routes and aggregates.
    pub globals: FragmentGlobals,

    /// Plain routes.
    pub routes: Vec<RouteSpec>,

    /// Aggregate routes.
    pub aggregates: Vec<AggregateSpec>,
}

/// Fragment-wide settings. Unset fields fall back to [`RouteDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FragmentGlobals {
    pub timeout_ms: Option<u64>,
    pub aggregate_timeout_ms: Option<u64>,
    pub scheme: Option<String>,
    pub retry: Option<RetrySpec>,
    pub circuit_breaker: Option<CircuitBreakerSpec>,
}

/// A single route mapping as written in a fragment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteSpec {
    /// Key that aggregate routes use to reference this route.
    #[serde(default)]
    pub key: Option<String>,

    /// Upstream HTTP method.
    #[serde(default = "default_method")]
    pub method: String,

    /// Upstream path template, e.g. `/users/{id}`.
    pub upstream_path: String,

    /// Host header to match (case-insensitive).
    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Downstream path template, e.g. `/api/users/{id}`.
    pub downstream_path: String,

    /// Downstream `host:port` candidates.
    pub downstream_hosts: Vec<String>,

    #[serde(default)]
    pub scheme: Option<String>,

    /// `no_load_balancer` (default) or `round_robin`.
    #[serde(default)]
    pub load_balancer: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: Option<RetrySpec>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSpec>,

    /// Wins collisions regardless of fragment precedence.
    #[serde(default, rename = "override")]
    pub is_override: bool,
}

/// An aggregate route as written in a fragment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregateSpec {
    #[serde(default = "default_method")]
    pub method: String,

    pub upstream_path: String,

    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Constituent route keys, in response order.
    pub routes: Vec<String>,

    /// Merge strategy name; `structural` when absent.
    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}
