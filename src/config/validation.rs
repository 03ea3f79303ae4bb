//! Gateway configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Fragment contents are validated later, per route, by the aggregator

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, RetrySpec};

/// A single semantic problem in the gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field}: unsupported scheme {value:?}")]
    UnsupportedScheme { field: &'static str, value: String },

    #[error("{field}: max_delay_ms ({max}) is below base_delay_ms ({base})")]
    BackoffRange { field: &'static str, base: u64, max: u64 },

    #[error("fragments.directory must not be empty")]
    EmptyFragmentDirectory,

    #[error("{field} ({timeout_ms} ms) must be below listener.request_timeout_secs ({limit_secs} s)")]
    TimeoutCeiling { field: &'static str, timeout_ms: u64, limit_secs: u64 },
}

/// Validate a parsed gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_nonzero(&mut errors, "listener.max_body_bytes", config.listener.max_body_bytes as u64);
    check_nonzero(&mut errors, "listener.request_timeout_secs", config.listener.request_timeout_secs);

    if config.fragments.directory.trim().is_empty() {
        errors.push(ValidationError::EmptyFragmentDirectory);
    }
    check_nonzero(&mut errors, "fragments.poll_interval_secs", config.fragments.poll_interval_secs);

    check_nonzero(&mut errors, "defaults.timeout_ms", config.defaults.timeout_ms);
    check_nonzero(&mut errors, "defaults.aggregate_timeout_ms", config.defaults.aggregate_timeout_ms);
    if !is_supported_scheme(&config.defaults.scheme) {
        errors.push(ValidationError::UnsupportedScheme {
            field: "defaults.scheme",
            value: config.defaults.scheme.clone(),
        });
    }
    check_retry(&mut errors, "defaults.retry", &config.defaults.retry);
    if config.defaults.circuit_breaker.failures_before_break > 0 {
        check_nonzero(
            &mut errors,
            "defaults.circuit_breaker.break_duration_ms",
            config.defaults.circuit_breaker.break_duration_ms,
        );
    }

    let limit_secs = config.listener.request_timeout_secs;
    if limit_secs > 0 {
        for (field, timeout_ms) in [
            ("defaults.timeout_ms", config.defaults.timeout_ms),
            ("defaults.aggregate_timeout_ms", config.defaults.aggregate_timeout_ms),
        ] {
            if timeout_ms >= limit_secs.saturating_mul(1000) {
                errors.push(ValidationError::TimeoutCeiling {
                    field,
                    timeout_ms,
                    limit_secs,
                });
            }
        }
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Schemes the downstream client can speak.
pub fn is_supported_scheme(scheme: &str) -> bool {
    matches!(scheme, "http" | "https")
}

/// Check a retry block; shared with fragment validation.
pub fn check_retry(errors: &mut Vec<ValidationError>, field: &'static str, retry: &RetrySpec) {
    check_nonzero(errors, field, retry.max_attempts as u64);
    if retry.max_delay_ms < retry.base_delay_ms {
        errors.push(ValidationError::BackoffRange {
            field,
            base: retry.base_delay_ms,
            max: retry.max_delay_ms,
        });
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}
