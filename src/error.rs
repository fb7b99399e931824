//! Error types for the Guardrail service.

use thiserror::Error;

/// Main error type for Guardrail operations.
///
/// Breaker rejections and rate-limit rejections are not part of this enum;
/// they are typed conditions of their own (`BreakerError`, `RateLimited`) so
/// callers can map them to specific responses.
#[derive(Error, Debug)]
pub enum GuardrailError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration could not be built or deserialized
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Errors merging configuration layers
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Guardrail operations.
pub type Result<T> = std::result::Result<T, GuardrailError>;
