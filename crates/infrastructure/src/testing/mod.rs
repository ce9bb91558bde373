//! Test support
//!
//! An in-memory sink that captures every interaction, used by the
//! integration tests and available to embedding applications for their
//! own test suites.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use application::{MetricHandle, TelemetrySink};
use domain::{
    CloudRole, DependencyRecord, ExceptionRecord, MetadataMap, MetricIdentifier,
    OperationContext, RequestRecord, Severity, UserContext,
};
use parking_lot::Mutex;

/// A record captured by [`MemorySink`]
#[derive(Debug, Clone)]
pub enum CapturedRecord {
    /// A forwarded trace message
    Trace {
        /// Trace message
        message: String,
        /// Severity it was forwarded with
        severity: Severity,
        /// Effective metadata after merging
        metadata: MetadataMap,
    },
    /// A forwarded named event
    Event {
        /// Event name
        name: String,
        /// Effective metadata after merging
        metadata: MetadataMap,
    },
    /// A forwarded exception
    Exception {
        /// Captured error
        exception: ExceptionRecord,
        /// Effective metadata after merging
        metadata: MetadataMap,
    },
    /// A forwarded request observation
    Request(RequestRecord),
    /// A forwarded dependency observation
    Dependency(DependencyRecord),
}

/// An in-memory aggregation series
#[derive(Debug, Default)]
pub struct MemorySeries {
    values: Mutex<Vec<f64>>,
}

impl MemorySeries {
    /// Every value recorded so far
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.values.lock().clone()
    }
}

impl MetricHandle for MemorySeries {
    fn record(&self, value: f64) {
        self.values.lock().push(value);
    }
}

/// Telemetry sink that records everything it receives
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CapturedRecord>>,
    role: Mutex<Option<CloudRole>>,
    operation: Mutex<OperationContext>,
    user: Mutex<UserContext>,
    series: Mutex<HashMap<MetricIdentifier, Arc<MemorySeries>>>,
    shutdowns: AtomicUsize,
}

impl MemorySink {
    /// An empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record captured so far, in arrival order
    #[must_use]
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// The last cloud role set, if any
    #[must_use]
    pub fn role(&self) -> Option<CloudRole> {
        self.role.lock().clone()
    }

    /// The current operation context
    #[must_use]
    pub fn operation(&self) -> OperationContext {
        self.operation.lock().clone()
    }

    /// The current user context
    #[must_use]
    pub fn user(&self) -> UserContext {
        self.user.lock().clone()
    }

    /// The series for an identifier, if one was ever resolved
    #[must_use]
    pub fn series(&self, identifier: &MetricIdentifier) -> Option<Arc<MemorySeries>> {
        self.series.lock().get(identifier).map(Arc::clone)
    }

    /// How many distinct series were resolved
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.series.lock().len()
    }

    /// How many times `shutdown` ran
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl TelemetrySink for MemorySink {
    fn send_trace(&self, message: &str, severity: Severity, metadata: &MetadataMap) {
        self.records.lock().push(CapturedRecord::Trace {
            message: message.to_string(),
            severity,
            metadata: metadata.clone(),
        });
    }

    fn send_event(&self, name: &str, metadata: &MetadataMap) {
        self.records.lock().push(CapturedRecord::Event {
            name: name.to_string(),
            metadata: metadata.clone(),
        });
    }

    fn send_exception(&self, exception: &ExceptionRecord, metadata: &MetadataMap) {
        self.records.lock().push(CapturedRecord::Exception {
            exception: exception.clone(),
            metadata: metadata.clone(),
        });
    }

    fn send_request(&self, record: &RequestRecord) {
        self.records
            .lock()
            .push(CapturedRecord::Request(record.clone()));
    }

    fn send_dependency(&self, record: &DependencyRecord) {
        self.records
            .lock()
            .push(CapturedRecord::Dependency(record.clone()));
    }

    fn metric(&self, identifier: &MetricIdentifier) -> Arc<dyn MetricHandle> {
        let mut series = self.series.lock();
        let handle = series
            .entry(identifier.clone())
            .or_insert_with(|| Arc::new(MemorySeries::default()));
        Arc::clone(handle) as Arc<dyn MetricHandle>
    }

    fn set_cloud_role(&self, role: &CloudRole) {
        *self.role.lock() = Some(role.clone());
    }

    fn set_operation(&self, operation: &OperationContext) {
        *self.operation.lock() = operation.clone();
    }

    fn set_user(&self, user: &UserContext) {
        *self.user.lock() = user.clone();
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
