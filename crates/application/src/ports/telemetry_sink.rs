//! Port for the wrapped telemetry sink
//!
//! The sink is the external SDK responsible for transport, batching,
//! sampling, and delivery. This layer only hands it finished records and
//! metric-identifier lookups; sink-internal failures are the sink's
//! contract and are never caught or retried here.
//!
//! The port is deliberately synchronous: every context operation is an
//! in-memory mutation plus one delegated call, invoked from arbitrary
//! caller threads.

use std::fmt;
use std::sync::Arc;

use domain::{
    CloudRole, DependencyRecord, ExceptionRecord, MetadataMap, MetricIdentifier,
    OperationContext, RequestRecord, Severity, UserContext,
};
#[cfg(test)]
use mockall::automock;

/// One aggregation series owned by the sink
///
/// Handles obtained for equal [`MetricIdentifier`]s must feed the same
/// underlying series.
pub trait MetricHandle: Send + Sync {
    /// Aggregate a value into the series
    fn record(&self, value: f64);

    /// Aggregate a single count
    fn increment(&self) {
        self.record(1.0);
    }
}

/// The wrapped telemetry SDK
#[cfg_attr(test, automock)]
pub trait TelemetrySink: Send + Sync {
    /// Forward a trace message with its effective metadata
    fn send_trace(&self, message: &str, severity: Severity, metadata: &MetadataMap);

    /// Forward a named event with its effective metadata
    fn send_event(&self, name: &str, metadata: &MetadataMap);

    /// Forward a captured error with its effective metadata
    fn send_exception(&self, exception: &ExceptionRecord, metadata: &MetadataMap);

    /// Forward an inbound-request observation
    fn send_request(&self, record: &RequestRecord);

    /// Forward an outbound-dependency observation
    fn send_dependency(&self, record: &DependencyRecord);

    /// Resolve the aggregation series for an identifier
    fn metric(&self, identifier: &MetricIdentifier) -> Arc<dyn MetricHandle>;

    /// Set the cloud role stamped onto outgoing telemetry
    fn set_cloud_role(&self, role: &CloudRole);

    /// Replace the current operation context
    fn set_operation(&self, operation: &OperationContext);

    /// Replace the current user context
    fn set_user(&self, user: &UserContext);

    /// Release transport resources; must be idempotent
    fn shutdown(&self);
}

/// How a context holds its sink
///
/// An owned sink is released exactly once when the context closes; a
/// shared sink belongs to someone else and is never released here. The
/// distinction is part of the type so the release contract cannot be
/// missed by convention.
pub enum SinkBinding {
    /// The context created the sink and releases it on close
    Owned(Arc<dyn TelemetrySink>),
    /// The sink is shared with other owners and outlives the context
    Shared(Arc<dyn TelemetrySink>),
}

impl SinkBinding {
    /// The bound sink, regardless of ownership
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        match self {
            Self::Owned(sink) | Self::Shared(sink) => sink,
        }
    }

    /// Whether the context is responsible for releasing the sink
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl fmt::Debug for SinkBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Owned(_) => "Owned",
            Self::Shared(_) => "Shared",
        };
        f.debug_tuple(variant).finish_non_exhaustive()
    }
}
