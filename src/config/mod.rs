//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable for the process lifetime)
//!
//! route fragments (TOML/JSON)
//!     → loader.rs parse_fragment → FragmentDocument
//!     → watcher.rs reports on-disk changes to the fragment store
//!     → routing::aggregator merges them into a RoutingTable
//! ```
//!
//! # Design Decisions
//! - The process config never reloads; only route fragments do
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError, FragmentFormat};
pub use schema::{
    AdminConfig, AggregateSpec, CircuitBreakerSpec, FragmentDocument, FragmentGlobals, FragmentSourceConfig, GatewayConfig,
    ListenerConfig, ObservabilityConfig, RetrySpec, RouteDefaults, RouteSpec,
};
