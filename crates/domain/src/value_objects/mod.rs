//! Value objects with construction-time validation

mod metadata;
mod metric_namespace;
mod traceparent;

pub use metadata::MetadataMap;
pub use metric_namespace::{MetricIdentifier, MetricNamespace};
pub use traceparent::TraceParent;
