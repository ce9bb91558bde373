//! Application layer for Beacon
//!
//! Defines the telemetry sink port and the convention-enforcing
//! `TelemetryContext` service that merges context metadata into every
//! outgoing record before delegating to the sink.

pub mod ports;
pub mod services;

pub use ports::*;
pub use services::*;
