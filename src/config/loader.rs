//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{FragmentDocument, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for gateway configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Encodings a fragment may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentFormat {
    Toml,
    Json,
}

impl FragmentFormat {
    /// Pick the format from a file name's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Some(Self::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Deserialize a fragment body. The error is rendered to text because the
/// two formats have unrelated error types.
pub fn parse_fragment(format: FragmentFormat, content: &str) -> Result<FragmentDocument, String> {
    match format {
        FragmentFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        FragmentFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    }
}
