//! Telemetry record types forwarded to the sink

use std::error::Error;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::TelemetryError;
use crate::value_objects::MetadataMap;

/// Severity of a trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    /// Diagnostic chatter, off in most deployments
    #[default]
    Verbose,
    /// Regular operational information
    Information,
    /// Something unexpected but recoverable
    Warning,
    /// An operation failed
    Error,
    /// The service is in a degraded or unusable state
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Verbose => "Verbose",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        };
        write!(f, "{name}")
    }
}

/// A captured error and its source chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionRecord {
    /// Top-level error message
    pub message: String,
    /// Messages of the underlying causes, outermost first
    pub chain: Vec<String>,
}

impl ExceptionRecord {
    /// Capture an error by walking its `source()` chain
    #[must_use]
    pub fn from_error(error: &dyn Error) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            chain,
        }
    }
}

/// An inbound request observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// Record identifier; generated unless the caller supplies one
    pub id: String,
    /// Request name, e.g. `GET /orders`
    pub name: String,
    /// When handling started
    pub start: DateTime<Utc>,
    /// How long handling took
    pub duration: Duration,
    /// Response code as reported to the caller
    pub response_code: String,
    /// Whether the request succeeded
    pub success: bool,
    /// Request URL, attached only when one was supplied
    pub url: Option<Url>,
}

impl RequestRecord {
    /// Build a request record with a freshly generated identifier
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
        response_code: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            start,
            duration,
            response_code: response_code.into(),
            success,
            url: None,
        }
    }

    /// Attach a request URL; an empty string is ignored
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidFormat` when a non-empty URL does
    /// not parse.
    pub fn with_url(mut self, url: &str) -> Result<Self, TelemetryError> {
        if url.is_empty() {
            return Ok(self);
        }
        let parsed = Url::parse(url)
            .map_err(|e| TelemetryError::invalid_format(format!("request URL '{url}': {e}")))?;
        self.url = Some(parsed);
        Ok(self)
    }

    /// Override the generated identifier; an empty string is ignored
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        if !id.is_empty() {
            self.id = id.to_string();
        }
        self
    }
}

/// An outbound dependency call observation
#[derive(Debug, Clone, Serialize)]
pub struct DependencyRecord {
    /// Remote endpoint, e.g. a host name or queue name
    pub target: String,
    /// Dependency kind, e.g. `SQL` or `HTTP`
    pub dependency_type: String,
    /// Logical call name
    pub name: String,
    /// Command or payload summary, e.g. the statement text
    pub data: String,
    /// When the call started
    pub start: DateTime<Utc>,
    /// How long the call took
    pub duration: Duration,
    /// Result code, attached only when non-blank
    pub result_code: Option<String>,
    /// Whether the call succeeded
    pub success: bool,
    /// Context metadata stamped onto the record
    pub properties: MetadataMap,
}

impl DependencyRecord {
    /// Build a dependency record without result code or properties
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        dependency_type: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
        success: bool,
    ) -> Self {
        Self {
            target: target.into(),
            dependency_type: dependency_type.into(),
            name: name.into(),
            data: data.into(),
            start,
            duration,
            result_code: None,
            success,
            properties: MetadataMap::new(),
        }
    }

    /// Attach a result code; blank codes are ignored
    #[must_use]
    pub fn with_result_code(mut self, result_code: &str) -> Self {
        if !result_code.trim().is_empty() {
            self.result_code = Some(result_code.to_string());
        }
        self
    }

    /// Attach the context metadata snapshot
    #[must_use]
    pub fn with_properties(mut self, properties: MetadataMap) -> Self {
        self.properties = properties;
        self
    }
}
