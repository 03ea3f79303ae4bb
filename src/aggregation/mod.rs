//! Aggregate route execution.
//!
//! # Data Flow
//! ```text
//! Resolution::Aggregate
//!     → executor.rs (concurrent branches, per-branch + aggregate deadlines)
//!     → result.rs (one DownstreamResult per constituent, declaration order)
//!     → strategy.rs (named MergeStrategy composes the response)
//! ```

pub mod executor;
pub mod result;
pub mod strategy;

pub use executor::{AggregateExecutor, InboundRequest};
pub use result::{AggregateResponse, BranchFailure, DownstreamResponse, DownstreamResult};
pub use strategy::{ListMerge, MergeStrategy, StrategyRegistry, StructuralMerge};
