//! Telemetry settings
//!
//! Layered loading: serde defaults, then an optional `beacon.toml` file,
//! then `BEACON_*` environment overrides (e.g. `BEACON_APPLICATION`,
//! `BEACON_EXPORT__ENDPOINT`). Absent optional keys never fail loading;
//! required dimensions are validated when a context is composed.

use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineConfig;

/// Settings for composing a telemetry context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Credential identifying the telemetry destination (sensitive -
    /// uses `SecretString`)
    ///
    /// Required when composing an owned sink; unused when an existing
    /// sink is shared.
    #[serde(skip_serializing, default)]
    pub instrumentation_key: Option<SecretString>,

    /// Application dimension, required
    #[serde(default)]
    pub application: String,

    /// Component dimension, required
    #[serde(default)]
    pub component: String,

    /// Optional module dimension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Cloud role name; defaults to the metric namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Cloud role instance, e.g. the host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_instance: Option<String>,

    /// Export pipeline configuration
    #[serde(default)]
    pub export: PipelineConfig,
}

impl TelemetrySettings {
    /// Load from `beacon.toml` (if present) and `BEACON_*` environment
    /// overrides
    ///
    /// # Errors
    ///
    /// Returns a `config::ConfigError` when a source is malformed.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("beacon").required(false))
            .add_source(
                config::Environment::with_prefix("BEACON")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load from a specific settings file
    ///
    /// # Errors
    ///
    /// Returns a `config::ConfigError` when the file is missing or
    /// malformed.
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }
}
