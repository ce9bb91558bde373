//! Application services

mod telemetry_context;

pub use telemetry_context::{TelemetryContext, TelemetryContextBuilder};
