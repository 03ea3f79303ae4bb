//! Merge strategies: turning ordered branch results into one response.
//!
//! Each strategy documents how it represents failed branches. Strategies
//! are pure functions of their ordered input.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use axum::http::StatusCode;
use serde_json::{json, Map, Value};

use crate::aggregation::result::{AggregateResponse, BranchFailure, DownstreamResult};
use crate::routing::route::DEFAULT_STRATEGY;

/// Combines the results of an aggregate's branches, in declaration order.
pub trait MergeStrategy: Send + Sync + fmt::Debug {
    /// Name used by aggregate definitions to select this strategy.
    fn name(&self) -> &str;

    fn merge(&self, results: &[DownstreamResult]) -> AggregateResponse;
}

/// One member per constituent key, in declaration order.
///
/// Successful bodies are embedded as JSON, or as a JSON string when the body
/// isn't JSON. A failed branch becomes a marker object:
/// `{"error":"timeout"}`, `{"error":"connection"}`,
/// `{"error":"circuit_open"}` or `{"error":"status","status":<code>}`.
/// Status is 200 when any branch succeeded, 502 when none did.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralMerge;

impl MergeStrategy for StructuralMerge {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    fn merge(&self, results: &[DownstreamResult]) -> AggregateResponse {
        let mut composite = Map::new();
        for result in results {
            let value = match result.outcome() {
                Ok(response) => body_value(&response.body),
                Err(failure) => failure_marker(failure),
            };
            composite.insert(result.key().to_string(), value);
        }
        AggregateResponse::json(overall_status(results), &Value::Object(composite))
    }
}

/// Concatenates paged list payloads.
///
/// Accepts `{"items":[...],"totalCount":n}` or a bare array from each branch.
/// Items are appended in declaration order; `totalCount` is summed (a branch
/// without one counts its items). Any other successful body is appended as a
/// single item. Failed branches contribute nothing to `items` and are listed
/// under `"errors"` with the same markers as [`StructuralMerge`]; the member is
/// omitted when every branch succeeded.
/// Status is 200 when any branch succeeded, 502 when none did.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListMerge;

impl MergeStrategy for ListMerge {
    fn name(&self) -> &str {
        "list"
    }

    fn merge(&self, results: &[DownstreamResult]) -> AggregateResponse {
        let mut items = Vec::new();
        let mut total: u64 = 0;
        let mut errors = Map::new();

        for result in results {
            match result.outcome() {
                Ok(response) => match body_value(&response.body) {
                    Value::Array(values) => {
                        total += values.len() as u64;
                        items.extend(values);
                    }
                    Value::Object(mut object) if object.get("items").is_some_and(Value::is_array) => {
                        let page = match object.remove("items") {
                            Some(Value::Array(page)) => page,
                            _ => Vec::new(),
                        };
                        total += object
                            .get("totalCount")
                            .and_then(Value::as_u64)
                            .unwrap_or(page.len() as u64);
                        items.extend(page);
                    }
                    Value::Null => {}
                    other => {
                        total += 1;
                        items.push(other);
                    }
                },
                Err(failure) => {
                    errors.insert(result.key().to_string(), failure_marker(failure));
                }
            }
        }

        let mut body = Map::new();
        body.insert("items".to_string(), Value::Array(items));
        body.insert("totalCount".to_string(), json!(total));
        if !errors.is_empty() {
            body.insert("errors".to_string(), Value::Object(errors));
        }
        AggregateResponse::json(overall_status(results), &Value::Object(body))
    }
}

/// Marker object for a failed branch.
pub fn failure_marker(failure: &BranchFailure) -> Value {
    match failure {
        BranchFailure::Status(response) => json!({
            "error": failure.classification(),
            "status": response.status.as_u16(),
        }),
        _ => json!({ "error": failure.classification() }),
    }
}

/// A body as JSON; non-JSON bodies become a string, empty bodies null.
pub fn body_value(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn overall_status(results: &[DownstreamResult]) -> StatusCode {
    if results.iter().any(DownstreamResult::is_success) {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// Named merge strategies available to aggregate routes.
///
/// Populate it before building the aggregator; unknown names are rejected
/// when fragments are merged, not when requests arrive.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn MergeStrategy>>,
}

impl StrategyRegistry {
    /// A registry with no strategies at all.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// `structural` and `list`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StructuralMerge));
        registry.register(Arc::new(ListMerge));
        registry
    }

    /// Add a strategy, returning the one it replaced.
    pub fn register(&mut self, strategy: Arc<dyn MergeStrategy>) -> Option<Arc<dyn MergeStrategy>> {
        self.strategies.insert(strategy.name().to_string(), strategy)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn MergeStrategy>> {
        self.strategies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
