//! Telemetry sink adapter over the `tracing` and `metrics` facades
//!
//! Records become structured `tracing` events and metric lookups become
//! `metrics` facade series. The adapter stamps the cloud role and the
//! current operation/user context onto every outgoing event when they are
//! set, and caches metric handles so equal identifiers share one series.

use std::collections::HashMap;
use std::sync::Arc;

use application::{MetricHandle, TelemetrySink};
use domain::{
    CloudRole, DependencyRecord, ExceptionRecord, MetadataMap, MetricIdentifier,
    OperationContext, RequestRecord, Severity, UserContext,
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::pipeline::PipelineGuard;

/// Fields stamped onto every outgoing event
#[derive(Default)]
struct Stamp {
    role: Option<String>,
    role_instance: Option<String>,
    trace_id: Option<String>,
    parent_id: Option<String>,
    operation: Option<String>,
    user_id: Option<String>,
}

macro_rules! stamped_event {
    ($level:ident, $stamp:expr, $($rest:tt)*) => {
        tracing::$level!(
            target: "beacon",
            role = $stamp.role.as_deref(),
            role_instance = $stamp.role_instance.as_deref(),
            trace_id = $stamp.trace_id.as_deref(),
            parent_id = $stamp.parent_id.as_deref(),
            operation = $stamp.operation.as_deref(),
            user_id = $stamp.user_id.as_deref(),
            $($rest)*
        )
    };
}

fn render_metadata(metadata: &MetadataMap) -> String {
    let mut entries: Vec<(&str, &str)> = metadata.iter().collect();
    entries.sort_unstable_by_key(|(k, _)| *k);
    entries
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One facade-backed aggregation series
struct FacadeSeries {
    histogram: metrics::Histogram,
}

impl MetricHandle for FacadeSeries {
    fn record(&self, value: f64) {
        self.histogram.record(value);
    }
}

/// Sink forwarding records to `tracing` and metrics to the `metrics` facade
///
/// Optionally owns the export [`PipelineGuard`]; shutting the sink down
/// releases it, flushing pending spans. Shutdown is idempotent.
#[derive(Default)]
pub struct TracingSink {
    role: RwLock<Option<CloudRole>>,
    operation: RwLock<OperationContext>,
    user: RwLock<UserContext>,
    series: Mutex<HashMap<MetricIdentifier, Arc<FacadeSeries>>>,
    pipeline: Mutex<Option<PipelineGuard>>,
}

impl TracingSink {
    /// A sink without an export pipeline of its own
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink owning the export pipeline guard
    #[must_use]
    pub fn with_pipeline(guard: PipelineGuard) -> Self {
        Self {
            pipeline: Mutex::new(Some(guard)),
            ..Self::default()
        }
    }

    fn stamp(&self) -> Stamp {
        let mut stamp = Stamp::default();
        if let Some(role) = self.role.read().as_ref() {
            if !role.name.is_empty() {
                stamp.role = Some(role.name.clone());
            }
            if !role.instance.is_empty() {
                stamp.role_instance = Some(role.instance.clone());
            }
        }
        let operation = self.operation.read();
        stamp.trace_id.clone_from(&operation.trace_id);
        stamp.parent_id.clone_from(&operation.parent_id);
        stamp.operation.clone_from(&operation.name);
        drop(operation);
        stamp.user_id.clone_from(&self.user.read().id);
        stamp
    }
}

impl std::fmt::Debug for TracingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingSink")
            .field("role", &*self.role.read())
            .field("series", &self.series.lock().len())
            .field("owns_pipeline", &self.pipeline.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetrySink for TracingSink {
    fn send_trace(&self, message: &str, severity: Severity, metadata: &MetadataMap) {
        let stamp = self.stamp();
        let rendered = render_metadata(metadata);
        match severity {
            Severity::Verbose => {
                stamped_event!(trace, stamp, metadata = %rendered, "{message}");
            }
            Severity::Information => {
                stamped_event!(info, stamp, metadata = %rendered, "{message}");
            }
            Severity::Warning => {
                stamped_event!(warn, stamp, metadata = %rendered, "{message}");
            }
            Severity::Error => {
                stamped_event!(error, stamp, metadata = %rendered, "{message}");
            }
            Severity::Critical => {
                stamped_event!(error, stamp, critical = true, metadata = %rendered, "{message}");
            }
        }
    }

    fn send_event(&self, name: &str, metadata: &MetadataMap) {
        let stamp = self.stamp();
        let rendered = render_metadata(metadata);
        stamped_event!(info, stamp, kind = "event", metadata = %rendered, "{name}");
    }

    fn send_exception(&self, exception: &ExceptionRecord, metadata: &MetadataMap) {
        let stamp = self.stamp();
        let rendered = render_metadata(metadata);
        let chain = exception.chain.join(" <- ");
        stamped_event!(
            error,
            stamp,
            kind = "exception",
            cause_chain = %chain,
            metadata = %rendered,
            "{}",
            exception.message
        );
    }

    fn send_request(&self, record: &RequestRecord) {
        let stamp = self.stamp();
        stamped_event!(
            info,
            stamp,
            kind = "request",
            id = %record.id,
            response_code = %record.response_code,
            success = record.success,
            duration_ms = record.duration.as_millis() as u64,
            start = %record.start.to_rfc3339(),
            url = record.url.as_ref().map(|u| u.as_str()),
            "{}",
            record.name
        );
    }

    fn send_dependency(&self, record: &DependencyRecord) {
        let stamp = self.stamp();
        let rendered = render_metadata(&record.properties);
        stamped_event!(
            info,
            stamp,
            kind = "dependency",
            dependency_target = %record.target,
            dependency_type = %record.dependency_type,
            data = %record.data,
            result_code = record.result_code.as_deref(),
            success = record.success,
            duration_ms = record.duration.as_millis() as u64,
            start = %record.start.to_rfc3339(),
            metadata = %rendered,
            "{}",
            record.name
        );
    }

    fn metric(&self, identifier: &MetricIdentifier) -> Arc<dyn MetricHandle> {
        let mut series = self.series.lock();
        let handle = series.entry(identifier.clone()).or_insert_with(|| {
            Arc::new(FacadeSeries {
                histogram: metrics::histogram!(identifier.qualified_name()),
            })
        });
        Arc::clone(handle) as Arc<dyn MetricHandle>
    }

    fn set_cloud_role(&self, role: &CloudRole) {
        *self.role.write() = Some(role.clone());
    }

    fn set_operation(&self, operation: &OperationContext) {
        *self.operation.write() = operation.clone();
    }

    fn set_user(&self, user: &UserContext) {
        *self.user.write() = user.clone();
    }

    fn shutdown(&self) {
        if let Some(guard) = self.pipeline.lock().take() {
            debug!("releasing telemetry export pipeline");
            drop(guard);
        }
    }
}
