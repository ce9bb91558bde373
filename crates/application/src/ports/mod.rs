//! Ports (interfaces) to external collaborators

mod telemetry_sink;

pub use telemetry_sink::{MetricHandle, SinkBinding, TelemetrySink};

#[cfg(test)]
pub use telemetry_sink::MockTelemetrySink;
