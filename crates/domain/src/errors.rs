//! Domain-level errors

use thiserror::Error;

/// Errors surfaced by telemetry context operations
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A required construction argument was absent or blank
    #[error("Required argument is missing: {0}")]
    MissingArgument(&'static str),

    /// Attempted to overwrite or remove a protected metadata key
    #[error("Metadata key is protected and cannot be modified: {0}")]
    ProtectedKey(String),

    /// A metadata key or value was empty where content is required
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A traceparent header or URL did not match the expected format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl TelemetryError {
    /// Create a protected-key error
    pub fn protected_key(name: impl Into<String>) -> Self {
        Self::ProtectedKey(name.into())
    }

    /// Create an invalid-format error
    pub fn invalid_format(detail: impl Into<String>) -> Self {
        Self::InvalidFormat(detail.into())
    }
}
