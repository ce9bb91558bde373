//! Composition helpers wiring settings, pipeline, sink, and context
//!
//! A library embedding Beacon calls one of these once at startup and
//! shares the returned `Arc<TelemetryContext>` across its threads. The
//! owned path builds the export pipeline and a [`TracingSink`] that holds
//! it; the shared path composes against a sink somebody else owns.
//!
//! [`TracingSink`]: crate::adapters::TracingSink

use std::sync::Arc;

use application::{SinkBinding, TelemetryContext, TelemetrySink};
use domain::{CloudRole, MetricNamespace, TelemetryError};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::adapters::TracingSink;
use crate::pipeline::{PipelineError, ServiceIdentity, init_pipeline};
use crate::settings::TelemetrySettings;

/// Errors from context composition
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Settings combination failed validation
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Export pipeline could not be built
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Settings sources could not be loaded
    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}

fn build_context(
    settings: &TelemetrySettings,
    binding: SinkBinding,
) -> Result<TelemetryContext, TelemetryError> {
    let mut builder =
        TelemetryContext::builder(settings.application.clone(), settings.component.clone());
    if let Some(module) = &settings.module {
        builder = builder.module(module.clone());
    }
    builder.build(binding)
}

fn cloud_role_for(settings: &TelemetrySettings, namespace: &MetricNamespace) -> CloudRole {
    let name = settings
        .role
        .clone()
        .unwrap_or_else(|| namespace.as_str().to_string());
    CloudRole::new(name, settings.role_instance.clone().unwrap_or_default())
}

/// Build a share-ready context owning its sink and export pipeline
///
/// Validates the dimensions, requires an instrumentation key, builds the
/// export pipeline, and wires an owned [`TracingSink`]. The cloud role
/// name falls back to the metric namespace when unset. Closing (or
/// dropping) the returned context releases the pipeline.
///
/// [`TracingSink`]: crate::adapters::TracingSink
///
/// # Errors
///
/// Returns `BootstrapError::Telemetry` for missing or blank required
/// settings and `BootstrapError::Pipeline` when the export pipeline
/// cannot be built.
pub fn shared_context(
    settings: &TelemetrySettings,
) -> Result<Arc<TelemetryContext>, BootstrapError> {
    let namespace = MetricNamespace::new(
        &settings.application,
        &settings.component,
        settings.module.as_deref(),
    )?;
    let key = settings
        .instrumentation_key
        .as_ref()
        .ok_or(TelemetryError::MissingArgument("instrumentation_key"))?;

    let role = cloud_role_for(settings, &namespace);
    let identity = ServiceIdentity {
        service_name: role.name.clone(),
        instance: settings.role_instance.clone(),
        instrumentation_key: Some(key.expose_secret().to_string()),
    };
    let guard = init_pipeline(&settings.export, &identity)?;

    let sink = Arc::new(TracingSink::with_pipeline(guard));
    sink.set_cloud_role(&role);

    let sink: Arc<dyn TelemetrySink> = sink;
    let context = build_context(settings, SinkBinding::Owned(sink))?;
    Ok(Arc::new(context))
}

/// Build a context borrowing an existing sink
///
/// The sink is shared: it is stamped with the cloud role (falling back
/// to the metric namespace) but never shut down by the returned context.
/// No instrumentation key is required.
///
/// # Errors
///
/// Returns `BootstrapError::Telemetry` for missing or blank required
/// settings.
pub fn context_with_sink(
    settings: &TelemetrySettings,
    sink: Arc<dyn TelemetrySink>,
) -> Result<Arc<TelemetryContext>, BootstrapError> {
    let namespace = MetricNamespace::new(
        &settings.application,
        &settings.component,
        settings.module.as_deref(),
    )?;
    sink.set_cloud_role(&cloud_role_for(settings, &namespace));

    let context = build_context(settings, SinkBinding::Shared(sink))?;
    Ok(Arc::new(context))
}

/// Load settings from `beacon.toml` / `BEACON_*` and build an owned
/// context
///
/// # Errors
///
/// Returns `BootstrapError::Settings` when the sources are malformed,
/// plus everything [`shared_context`] can return.
pub fn shared_context_from_env() -> Result<Arc<TelemetryContext>, BootstrapError> {
    let settings = TelemetrySettings::load()?;
    shared_context(&settings)
}
