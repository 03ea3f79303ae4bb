//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Route call (single route or aggregate branch):
//!     → circuit_breaker.rs (open breaker → fail fast)
//!     → timeouts.rs (route timeout around the whole call)
//!     → retries.rs (idempotent + retryable outcome → retry)
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Breakers are opt-in per route and survive table reloads

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{guarded_call, CircuitBreakers};
pub use timeouts::bounded_call;
