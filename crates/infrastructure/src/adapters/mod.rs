//! Sink adapters over concrete telemetry backends

mod tracing_sink;

pub use tracing_sink::TracingSink;
