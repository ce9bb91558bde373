//! OTLP export pipeline bootstrap
//!
//! Builds the span export pipeline the [`TracingSink`] adapter feeds into
//! and installs the `tracing` subscriber layers. Degrades to console-only
//! logging when the collector is unreachable and graceful fallback is
//! enabled.
//!
//! [`TracingSink`]: crate::adapters::TracingSink

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracerProvider},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the export pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whether OTLP export is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL (e.g., "http://localhost:4317" for gRPC)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Sampling ratio (0.0 - 1.0)
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    /// Batch export timeout in seconds
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,

    /// Maximum batch size for span export
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Log level filter (e.g., "info", "beacon=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Whether to fall back to console-only logging if OTLP export fails
    ///
    /// When `true` (default), an unreachable collector downgrades the
    /// pipeline to console-only logging instead of failing construction.
    /// Set to `false` to require a working collector.
    #[serde(default = "default_graceful_fallback")]
    pub graceful_fallback: bool,
}

const fn default_sampling_ratio() -> f64 {
    1.0
}

const fn default_export_timeout() -> u64 {
    30
}

const fn default_max_batch_size() -> usize {
    512
}

fn default_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

const fn default_graceful_fallback() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            sampling_ratio: default_sampling_ratio(),
            export_timeout_secs: default_export_timeout(),
            max_batch_size: default_max_batch_size(),
            log_filter: default_log_filter(),
            graceful_fallback: default_graceful_fallback(),
        }
    }
}

/// The service identity stamped onto the export resource
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    /// `service.name` resource attribute, usually the cloud role name
    pub service_name: String,
    /// `service.instance.id` resource attribute, when known
    pub instance: Option<String>,
    /// Resource credential identifying the telemetry destination
    pub instrumentation_key: Option<String>,
}

/// Error type for pipeline construction
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to install the tracing subscriber
    #[error("Failed to initialize tracing: {0}")]
    Init(String),

    /// Failed to create the OTLP exporter
    #[error("Failed to create OTLP exporter: {0}")]
    Exporter(String),
}

/// Guard that shuts down the tracer provider when dropped
pub struct PipelineGuard {
    provider: Option<SdkTracerProvider>,
}

impl PipelineGuard {
    /// A guard with no active provider, for sinks without export
    #[must_use]
    pub const fn inactive() -> Self {
        Self { provider: None }
    }
}

impl std::fmt::Debug for PipelineGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGuard")
            .field("active", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::error!("Failed to shutdown tracer provider: {e:?}");
            }
        }
    }
}

fn resource_for(identity: &ServiceIdentity) -> Resource {
    let mut builder = Resource::builder().with_service_name(identity.service_name.clone());
    if let Some(instance) = &identity.instance {
        builder = builder.with_attribute(KeyValue::new("service.instance.id", instance.clone()));
    }
    if let Some(key) = &identity.instrumentation_key {
        builder = builder.with_attribute(KeyValue::new("beacon.instrumentation_key", key.clone()));
    }
    builder.build()
}

/// Build the export pipeline and install the subscriber layers
///
/// Returns a guard that must stay alive for the lifetime of the pipeline;
/// dropping it shuts the provider down and flushes pending spans. The
/// [`TracingSink`] adapter holds the guard when it owns the pipeline.
///
/// [`TracingSink`]: crate::adapters::TracingSink
///
/// # Errors
///
/// Returns `PipelineError::Init` when a subscriber is already installed
/// and `PipelineError::Exporter` when the exporter cannot be built and
/// graceful fallback is disabled.
pub fn init_pipeline(
    config: &PipelineConfig,
    identity: &ServiceIdentity,
) -> Result<PipelineGuard, PipelineError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| PipelineError::Init(e.to_string()))?;

        info!("Telemetry pipeline initialized (OTLP disabled, console only)");
        return Ok(PipelineGuard { provider: None });
    }

    let exporter_result = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .with_timeout(Duration::from_secs(config.export_timeout_secs))
        .build();

    match exporter_result {
        Ok(exporter) => {
            let sampler = if (config.sampling_ratio - 1.0).abs() < f64::EPSILON {
                Sampler::AlwaysOn
            } else if config.sampling_ratio <= 0.0 {
                Sampler::AlwaysOff
            } else {
                Sampler::TraceIdRatioBased(config.sampling_ratio)
            };

            let batch_config = BatchConfigBuilder::default()
                .with_max_export_batch_size(config.max_batch_size)
                .build();
            let processor = BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build();

            let provider = SdkTracerProvider::builder()
                .with_span_processor(processor)
                .with_sampler(sampler)
                .with_resource(resource_for(identity))
                .build();

            let tracer = provider.tracer(identity.service_name.clone());
            let otel_layer = OpenTelemetryLayer::new(tracer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()
                .map_err(|e| PipelineError::Init(e.to_string()))?;

            info!(
                endpoint = %config.endpoint,
                service = %identity.service_name,
                sampling = %config.sampling_ratio,
                "Telemetry pipeline initialized with OTLP export"
            );

            Ok(PipelineGuard {
                provider: Some(provider),
            })
        }
        Err(e) => {
            if config.graceful_fallback {
                warn!(
                    endpoint = %config.endpoint,
                    error = %e,
                    "OTLP collector unavailable, falling back to console-only logging"
                );

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .try_init()
                    .map_err(|e| PipelineError::Init(e.to_string()))?;

                info!("Telemetry pipeline initialized (OTLP fallback to console)");
                Ok(PipelineGuard { provider: None })
            } else {
                Err(PipelineError::Exporter(e.to_string()))
            }
        }
    }
}
