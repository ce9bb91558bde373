//! Infrastructure layer for Beacon
//!
//! Concrete sink adapters, the OTLP export pipeline, settings loading,
//! and the composition helpers that wire everything into a share-ready
//! `TelemetryContext`.

pub mod adapters;
pub mod bootstrap;
pub mod pipeline;
pub mod settings;
pub mod testing;

pub use adapters::TracingSink;
pub use bootstrap::{BootstrapError, context_with_sink, shared_context, shared_context_from_env};
pub use pipeline::{PipelineConfig, PipelineError, PipelineGuard, ServiceIdentity, init_pipeline};
pub use settings::TelemetrySettings;
