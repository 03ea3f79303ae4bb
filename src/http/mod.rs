//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, gateway handler)
//!     → request.rs (request ID, header filtering, body buffering)
//!     → routing table snapshot resolves the request
//!     → client.rs (downstream calls; aggregates via aggregation::executor)
//!     → response.rs (passthrough, gateway errors, merged aggregates)
//!     → Send to client
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::{CallError, DownstreamClient, DownstreamRequest, HyperDownstreamClient};
pub use request::X_REQUEST_ID;
pub use server::{AppState, GatewayServer};
