//! Per-branch outcomes and the composed aggregate response.

use std::time::Duration;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

/// A response received from a downstream service.
#[derive(Debug, Clone)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Why a branch produced no usable response.
#[derive(Debug, Clone)]
pub enum BranchFailure {
    /// The route timeout or the aggregate deadline elapsed.
    Timeout,
    /// The call never produced a response.
    Connection(String),
    /// The downstream answered with a non-2xx status.
    Status(DownstreamResponse),
    /// The route's circuit breaker is open; no call was made.
    CircuitOpen,
}

impl BranchFailure {
    /// Stable label used in merged bodies, logs and metrics.
    pub fn classification(&self) -> &'static str {
        match self {
            BranchFailure::Timeout => "timeout",
            BranchFailure::Connection(_) => "connection",
            BranchFailure::Status(_) => "status",
            BranchFailure::CircuitOpen => "circuit_open",
        }
    }
}

/// Outcome of one constituent call, tagged with its route key.
#[derive(Debug, Clone)]
pub struct DownstreamResult {
    key: String,
    elapsed: Duration,
    outcome: Result<DownstreamResponse, BranchFailure>,
}

impl DownstreamResult {
    pub fn new(key: impl Into<String>, elapsed: Duration, outcome: Result<DownstreamResponse, BranchFailure>) -> Self {
        Self {
            key: key.into(),
            elapsed,
            outcome,
        }
    }

    /// Classify a received response: 2xx is a success, anything else a `Status` failure.
    pub fn from_response(key: impl Into<String>, elapsed: Duration, response: DownstreamResponse) -> Self {
        let outcome = if response.status.is_success() {
            Ok(response)
        } else {
            Err(BranchFailure::Status(response))
        };
        Self::new(key, elapsed, outcome)
    }

    pub fn timeout(key: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(key, elapsed, Err(BranchFailure::Timeout))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn outcome(&self) -> Result<&DownstreamResponse, &BranchFailure> {
        self.outcome.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Label for logs and metrics.
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            Ok(_) => "success",
            Err(failure) => failure.classification(),
        }
    }
}

/// The single response produced for an aggregate route.
#[derive(Debug, Clone)]
pub struct AggregateResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AggregateResponse {
    /// A JSON response with the given status.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            // Serializing a Value cannot fail.
            body: Bytes::from(serde_json::to_vec(value).unwrap_or_default()),
        }
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}
