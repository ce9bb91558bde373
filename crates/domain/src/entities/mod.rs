//! Telemetry record and context entities

mod context;
mod records;

pub use context::{CloudRole, OperationContext, UserContext};
pub use records::{DependencyRecord, ExceptionRecord, RequestRecord, Severity};
