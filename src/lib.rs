//! Fragment-driven API gateway library.
//!
//! Route definitions are split across fragments; the gateway merges them
//! into one versioned routing table, swaps it atomically on change, and
//! serves plain forwards and aggregate fan-outs from the current snapshot.

pub mod admin;
pub mod aggregation;
pub mod config;
pub mod fragments;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::{Gateway, Shutdown};
