//! The convention-enforcing telemetry context
//!
//! A `TelemetryContext` owns a metadata set seeded with the protected
//! `Application` / `Component` (and optional `Module`) dimensions, the
//! metric namespace derived from them, and the transient operation and
//! user contexts. Every write operation merges the stored metadata into
//! the outgoing record (stored entries always win) and delegates to the
//! bound sink.
//!
//! One context instance is meant to be shared across request-handling
//! threads; all mutable state sits behind a single lock and writers
//! snapshot under it.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use application::{MetricHandle, SinkBinding, TelemetryContext, TelemetrySink};
//! use domain::Severity;
//!
//! fn run(sink: Arc<dyn TelemetrySink>) {
//!     let telemetry = TelemetryContext::builder("Billing", "Invoices")
//!         .module("Pdf")
//!         .build(SinkBinding::Shared(sink))
//!         .unwrap();
//!
//!     telemetry.add_metadata("Tenant", "acme").unwrap();
//!     telemetry.write_trace("rendering invoice", Severity::Information, None);
//!     telemetry.metric("rendered").increment();
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{
    CloudRole, DependencyRecord, ExceptionRecord, MetadataMap, MetricIdentifier, MetricNamespace,
    OperationContext, RequestRecord, Severity, TelemetryError, TraceParent, UserContext,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::ports::{MetricHandle, SinkBinding, TelemetrySink};

/// Metadata key the operation state (W3C `tracestate`) is stored under.
///
/// This is a regular, non-protected entry: a caller-added key of the same
/// name shares the slot. Last write wins either way.
const TRACE_STATE_KEY: &str = "TraceState";

#[derive(Default)]
struct ContextState {
    metadata: MetadataMap,
    operation: OperationContext,
    user: UserContext,
}

/// Builder for [`TelemetryContext`]
///
/// One `build` validates the whole combination: application and component
/// are required, a module is optional, and role/role-instance must be
/// supplied together or not at all.
#[derive(Debug, Clone)]
pub struct TelemetryContextBuilder {
    application: String,
    component: String,
    module: Option<String>,
    role: Option<String>,
    role_instance: Option<String>,
}

impl TelemetryContextBuilder {
    /// Record the optional module dimension
    #[must_use]
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Record the cloud role name forwarded to the sink
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Record the cloud role instance forwarded to the sink
    #[must_use]
    pub fn role_instance(mut self, instance: impl Into<String>) -> Self {
        self.role_instance = Some(instance.into());
        self
    }

    /// Validate the combination and build the context
    ///
    /// Seeds the protected metadata dimensions, derives the metric
    /// namespace, and forwards the cloud role (when given) to the sink.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::MissingArgument` when application or
    /// component is blank or when only one half of the role/instance
    /// pair is given, and `TelemetryError::InvalidArgument` when a
    /// supplied module is blank.
    pub fn build(self, binding: SinkBinding) -> Result<TelemetryContext, TelemetryError> {
        let namespace =
            MetricNamespace::new(&self.application, &self.component, self.module.as_deref())?;

        let mut metadata = MetadataMap::new();
        metadata.seed("Application", self.application)?;
        metadata.seed("Component", self.component)?;
        if let Some(module) = self.module {
            metadata.seed("Module", module)?;
        }

        let role = match (self.role, self.role_instance) {
            (Some(name), Some(instance)) => Some(CloudRole::new(name, instance)),
            (Some(_), None) => return Err(TelemetryError::MissingArgument("role_instance")),
            (None, Some(_)) => return Err(TelemetryError::MissingArgument("role")),
            (None, None) => None,
        };
        if let Some(role) = &role {
            binding.sink().set_cloud_role(role);
        }

        Ok(TelemetryContext {
            binding,
            namespace,
            state: Mutex::new(ContextState {
                metadata,
                operation: OperationContext::default(),
                user: UserContext::default(),
            }),
            closed: AtomicBool::new(false),
        })
    }
}

/// Convention-enforcing facade over a telemetry sink
pub struct TelemetryContext {
    binding: SinkBinding,
    namespace: MetricNamespace,
    state: Mutex<ContextState>,
    closed: AtomicBool,
}

impl TelemetryContext {
    /// Start building a context for the given application and component
    #[must_use]
    pub fn builder(
        application: impl Into<String>,
        component: impl Into<String>,
    ) -> TelemetryContextBuilder {
        TelemetryContextBuilder {
            application: application.into(),
            component: component.into(),
            module: None,
            role: None,
            role_instance: None,
        }
    }

    fn sink(&self) -> &Arc<dyn TelemetrySink> {
        self.binding.sink()
    }

    /// The metric namespace derived at construction
    #[must_use]
    pub const fn namespace(&self) -> &MetricNamespace {
        &self.namespace
    }

    /// Insert or overwrite a non-protected metadata entry
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::ProtectedKey` for protected keys and
    /// `TelemetryError::InvalidArgument` for a blank key; the metadata
    /// set is untouched on failure.
    pub fn add_metadata(&self, name: &str, value: &str) -> Result<(), TelemetryError> {
        self.state.lock().metadata.insert(name, value)
    }

    /// Remove a non-protected metadata entry; absent keys are a no-op
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::ProtectedKey` for protected keys.
    pub fn remove_metadata(&self, name: &str) -> Result<(), TelemetryError> {
        self.state.lock().metadata.remove(name)
    }

    /// Remove every non-protected metadata entry
    pub fn reset_metadata(&self) {
        self.state.lock().metadata.reset();
    }

    /// Case-insensitive metadata lookup
    #[must_use]
    pub fn metadata_value(&self, name: &str) -> Option<String> {
        self.state.lock().metadata.get(name).map(ToString::to_string)
    }

    /// A consistent snapshot of the stored metadata
    #[must_use]
    pub fn metadata_snapshot(&self) -> MetadataMap {
        self.state.lock().metadata.clone()
    }

    /// Set the operation context from raw identifiers
    ///
    /// Overwrites any prior operation context and forwards the new one to
    /// the sink.
    pub fn set_operation_context(&self, trace_id: &str, name: &str, parent_id: Option<&str>) {
        let operation = OperationContext::from_parts(trace_id, name, parent_id);
        {
            self.state.lock().operation = operation.clone();
        }
        self.sink().set_operation(&operation);
    }

    /// Set the operation context from a W3C `traceparent` header
    ///
    /// The header must be `version-traceid-parentid-flags` with version
    /// and flags of two hex digits each. The decoded version and flags
    /// stay observable through [`operation_context`].
    ///
    /// [`operation_context`]: TelemetryContext::operation_context
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidFormat` on a malformed header;
    /// the existing operation context is untouched.
    pub fn set_operation_context_from_header(
        &self,
        traceparent: &str,
        name: &str,
    ) -> Result<(), TelemetryError> {
        let header: TraceParent = traceparent.parse()?;
        let operation = OperationContext::from_traceparent(&header, name);
        {
            self.state.lock().operation = operation.clone();
        }
        self.sink().set_operation(&operation);
        Ok(())
    }

    /// Null the operation context; the `TraceState` entry is untouched
    pub fn clear_operation_context(&self) {
        let cleared = OperationContext::default();
        {
            self.state.lock().operation = cleared.clone();
        }
        self.sink().set_operation(&cleared);
    }

    /// Store a raw `tracestate` header under the `TraceState` metadata key
    pub fn set_operation_state(&self, trace_state: &str) {
        let mut state = self.state.lock();
        // TRACE_STATE_KEY is a non-empty literal and never seeded as
        // protected, so the insert cannot fail.
        let _ = state.metadata.insert(TRACE_STATE_KEY, trace_state);
    }

    /// Remove the `TraceState` metadata entry, if present
    pub fn clear_operation_state(&self) {
        let mut state = self.state.lock();
        let _ = state.metadata.remove(TRACE_STATE_KEY);
    }

    /// The current operation context
    #[must_use]
    pub fn operation_context(&self) -> OperationContext {
        self.state.lock().operation.clone()
    }

    /// Set the user context, replacing any prior one
    pub fn set_user_context(&self, user: UserContext) {
        {
            self.state.lock().user = user.clone();
        }
        self.sink().set_user(&user);
    }

    /// Null every user context field
    pub fn clear_user_context(&self) {
        self.set_user_context(UserContext::default());
    }

    /// The current user context
    #[must_use]
    pub fn user_context(&self) -> UserContext {
        self.state.lock().user.clone()
    }

    fn effective_metadata(&self, extra: Option<&HashMap<String, String>>) -> MetadataMap {
        let state = self.state.lock();
        match extra {
            Some(extra) => state.metadata.merged_over(extra),
            None => state.metadata.clone(),
        }
    }

    /// Forward a trace message
    ///
    /// When `extra` is given, the forwarded metadata starts from it and
    /// every stored entry overwrites on key collision: stored context
    /// always wins.
    pub fn write_trace(
        &self,
        message: &str,
        severity: Severity,
        extra: Option<&HashMap<String, String>>,
    ) {
        let metadata = self.effective_metadata(extra);
        self.sink().send_trace(message, severity, &metadata);
    }

    /// Forward a named event, merging metadata as in [`write_trace`]
    ///
    /// [`write_trace`]: TelemetryContext::write_trace
    pub fn write_event(&self, name: &str, extra: Option<&HashMap<String, String>>) {
        let metadata = self.effective_metadata(extra);
        self.sink().send_event(name, &metadata);
    }

    /// Capture an error and forward it, merging metadata as in
    /// [`write_trace`]
    ///
    /// [`write_trace`]: TelemetryContext::write_trace
    pub fn write_exception(
        &self,
        error: &dyn std::error::Error,
        extra: Option<&HashMap<String, String>>,
    ) {
        let record = ExceptionRecord::from_error(error);
        let metadata = self.effective_metadata(extra);
        self.sink().send_exception(&record, &metadata);
    }

    /// Forward an inbound-request observation
    ///
    /// A non-empty `url` must parse; a non-empty `request_id` overrides
    /// the generated record identifier.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidFormat` for a malformed URL;
    /// nothing is forwarded on failure.
    #[allow(clippy::too_many_arguments)]
    pub fn write_request(
        &self,
        name: &str,
        start: DateTime<Utc>,
        duration: Duration,
        response_code: &str,
        success: bool,
        url: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<(), TelemetryError> {
        let mut record = RequestRecord::new(name, start, duration, response_code, success);
        if let Some(url) = url {
            record = record.with_url(url)?;
        }
        if let Some(request_id) = request_id {
            record = record.with_id(request_id);
        }
        self.sink().send_request(&record);
        Ok(())
    }

    /// Forward an outbound-dependency observation
    ///
    /// The full stored metadata snapshot is stamped onto the record;
    /// there is no per-call override path for dependencies. A blank
    /// result code is dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn write_dependency(
        &self,
        target: &str,
        dependency_type: &str,
        name: &str,
        data: &str,
        start: DateTime<Utc>,
        duration: Duration,
        result_code: &str,
        success: bool,
    ) {
        let properties = self.metadata_snapshot();
        let record =
            DependencyRecord::new(target, dependency_type, name, data, start, duration, success)
                .with_result_code(result_code)
                .with_properties(properties);
        self.sink().send_dependency(&record);
    }

    /// The aggregation series for `name` under the context namespace
    #[must_use]
    pub fn metric(&self, name: &str) -> Arc<dyn MetricHandle> {
        self.metric_with_suffix(name, None)
    }

    /// The aggregation series for `name` under a suffixed namespace
    ///
    /// A `None`, empty, or whitespace-only suffix is equivalent to
    /// [`metric`]; the suffix never persists.
    ///
    /// [`metric`]: TelemetryContext::metric
    #[must_use]
    pub fn metric_with_suffix(&self, name: &str, suffix: Option<&str>) -> Arc<dyn MetricHandle> {
        let identifier = MetricIdentifier::new(&self.namespace, suffix, name);
        self.sink().metric(&identifier)
    }

    /// Release the sink when this context owns it
    ///
    /// Idempotent: the first call shuts an owned sink down, every later
    /// call is a no-op. Shared sinks are never shut down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.binding.is_owned() {
            debug!(namespace = %self.namespace, "shutting down owned telemetry sink");
            self.binding.sink().shutdown();
        }
    }

    /// Whether [`close`] has run
    ///
    /// [`close`]: TelemetryContext::close
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for TelemetryContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("namespace", &self.namespace)
            .field("binding", &self.binding)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use mockall::predicate::eq;

    use super::*;
    use crate::ports::MockTelemetrySink;

    struct NoopHandle;

    impl MetricHandle for NoopHandle {
        fn record(&self, _value: f64) {}
    }

    /// Records every sink interaction for assertions
    #[derive(Default)]
    struct RecordingSink {
        traces: Mutex<Vec<(String, Severity, MetadataMap)>>,
        events: Mutex<Vec<(String, MetadataMap)>>,
        exceptions: Mutex<Vec<(ExceptionRecord, MetadataMap)>>,
        requests: Mutex<Vec<RequestRecord>>,
        dependencies: Mutex<Vec<DependencyRecord>>,
        roles: Mutex<Vec<CloudRole>>,
        operations: Mutex<Vec<OperationContext>>,
        users: Mutex<Vec<UserContext>>,
        metric_lookups: Mutex<Vec<MetricIdentifier>>,
        shutdowns: AtomicUsize,
    }

    impl TelemetrySink for RecordingSink {
        fn send_trace(&self, message: &str, severity: Severity, metadata: &MetadataMap) {
            self.traces
                .lock()
                .push((message.to_string(), severity, metadata.clone()));
        }

        fn send_event(&self, name: &str, metadata: &MetadataMap) {
            self.events.lock().push((name.to_string(), metadata.clone()));
        }

        fn send_exception(&self, exception: &ExceptionRecord, metadata: &MetadataMap) {
            self.exceptions
                .lock()
                .push((exception.clone(), metadata.clone()));
        }

        fn send_request(&self, record: &RequestRecord) {
            self.requests.lock().push(record.clone());
        }

        fn send_dependency(&self, record: &DependencyRecord) {
            self.dependencies.lock().push(record.clone());
        }

        fn metric(&self, identifier: &MetricIdentifier) -> Arc<dyn MetricHandle> {
            self.metric_lookups.lock().push(identifier.clone());
            Arc::new(NoopHandle)
        }

        fn set_cloud_role(&self, role: &CloudRole) {
            self.roles.lock().push(role.clone());
        }

        fn set_operation(&self, operation: &OperationContext) {
            self.operations.lock().push(operation.clone());
        }

        fn set_user(&self, user: &UserContext) {
            self.users.lock().push(user.clone());
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context_with(sink: &Arc<RecordingSink>) -> TelemetryContext {
        let shared: Arc<dyn TelemetrySink> = Arc::clone(sink) as Arc<dyn TelemetrySink>;
        TelemetryContext::builder("MyApp", "MyComponent")
            .build(SinkBinding::Shared(shared))
            .unwrap()
    }

    const W3C_EXAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn build_seeds_protected_dimensions() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        assert_eq!(
            telemetry.metadata_value("application").as_deref(),
            Some("MyApp")
        );
        assert_eq!(
            telemetry.metadata_value("COMPONENT").as_deref(),
            Some("MyComponent")
        );
        assert_eq!(telemetry.namespace().as_str(), "MyApp.MyComponent");
    }

    #[test]
    fn build_with_module_extends_the_namespace() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = Arc::clone(&sink) as Arc<dyn TelemetrySink>;
        let telemetry = TelemetryContext::builder("MyApp", "MyComponent")
            .module("Ingest")
            .build(SinkBinding::Shared(shared))
            .unwrap();

        assert_eq!(telemetry.namespace().as_str(), "MyApp.MyComponent.Ingest");
        assert_eq!(telemetry.metadata_value("Module").as_deref(), Some("Ingest"));
        assert!(telemetry.add_metadata("module", "other").is_err());
    }

    #[test]
    fn blank_application_fails_construction() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = sink as Arc<dyn TelemetrySink>;
        let err = TelemetryContext::builder("  ", "Comp")
            .build(SinkBinding::Shared(shared))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::MissingArgument("application")));
    }

    #[test]
    fn blank_module_fails_construction() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = sink as Arc<dyn TelemetrySink>;
        let err = TelemetryContext::builder("App", "Comp")
            .module(" ")
            .build(SinkBinding::Shared(shared))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidArgument(_)));
    }

    #[test]
    fn lone_role_fails_construction() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = sink as Arc<dyn TelemetrySink>;
        let err = TelemetryContext::builder("App", "Comp")
            .role("backend")
            .build(SinkBinding::Shared(shared))
            .unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::MissingArgument("role_instance")
        ));
    }

    #[test]
    fn lone_role_instance_fails_construction() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = sink as Arc<dyn TelemetrySink>;
        let err = TelemetryContext::builder("App", "Comp")
            .role_instance("host-1")
            .build(SinkBinding::Shared(shared))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::MissingArgument("role")));
    }

    #[test]
    fn role_pair_is_forwarded_to_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let shared: Arc<dyn TelemetrySink> = Arc::clone(&sink) as Arc<dyn TelemetrySink>;
        let _telemetry = TelemetryContext::builder("App", "Comp")
            .role("backend")
            .role_instance("host-1")
            .build(SinkBinding::Shared(shared))
            .unwrap();

        let roles = sink.roles.lock();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0], CloudRole::new("backend", "host-1"));
    }

    #[test]
    fn role_forwarding_via_mock_expectation() {
        let mut mock = MockTelemetrySink::new();
        mock.expect_set_cloud_role()
            .with(eq(CloudRole::new("backend", "host-1")))
            .times(1)
            .return_const(());

        let shared: Arc<dyn TelemetrySink> = Arc::new(mock);
        let _telemetry = TelemetryContext::builder("App", "Comp")
            .role("backend")
            .role_instance("host-1")
            .build(SinkBinding::Shared(shared))
            .unwrap();
    }

    #[test]
    fn protected_keys_reject_mutation_in_any_state() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        for key in ["Application", "application", "COMPONENT"] {
            assert!(matches!(
                telemetry.add_metadata(key, "x"),
                Err(TelemetryError::ProtectedKey(_))
            ));
            assert!(matches!(
                telemetry.remove_metadata(key),
                Err(TelemetryError::ProtectedKey(_))
            ));
        }
        telemetry.reset_metadata();
        assert!(matches!(
            telemetry.remove_metadata("Application"),
            Err(TelemetryError::ProtectedKey(_))
        ));
    }

    #[test]
    fn last_write_wins_for_regular_keys() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry.add_metadata("Tenant", "first").unwrap();
        telemetry.add_metadata("tenant", "second").unwrap();
        assert_eq!(telemetry.metadata_value("TENANT").as_deref(), Some("second"));

        telemetry.remove_metadata("Tenant").unwrap();
        assert_eq!(telemetry.metadata_value("Tenant"), None);
    }

    #[test]
    fn reset_metadata_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry.add_metadata("Tenant", "acme").unwrap();
        telemetry.reset_metadata();
        let once = telemetry.metadata_snapshot().to_map();
        telemetry.reset_metadata();
        assert_eq!(telemetry.metadata_snapshot().to_map(), once);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn traceparent_header_roundtrip() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry
            .set_operation_context_from_header(W3C_EXAMPLE, "checkout")
            .unwrap();

        let op = telemetry.operation_context();
        assert_eq!(
            op.trace_id.as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert_eq!(op.parent_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_eq!(op.name.as_deref(), Some("checkout"));
        assert_eq!(op.header_version, Some(0));
        assert_eq!(op.header_flags, Some(1));

        let forwarded = sink.operations.lock();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0], op);
    }

    #[test]
    fn malformed_header_leaves_state_unchanged() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);
        telemetry.set_operation_context("trace-1", "checkout", Some("span-9"));
        let before = telemetry.operation_context();

        for header in ["00-abc-def", "zz-abc-def-01", ""] {
            let err = telemetry
                .set_operation_context_from_header(header, "ignored")
                .unwrap_err();
            assert!(matches!(err, TelemetryError::InvalidFormat(_)));
        }
        assert_eq!(telemetry.operation_context(), before);
        // only the successful set reached the sink
        assert_eq!(sink.operations.lock().len(), 1);
    }

    #[test]
    fn clear_operation_context_is_independent_of_trace_state() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry.set_operation_state("congo=t61rcWkgMzE");
        telemetry
            .set_operation_context_from_header(W3C_EXAMPLE, "checkout")
            .unwrap();
        telemetry.clear_operation_context();

        assert!(telemetry.operation_context().is_empty());
        assert_eq!(
            telemetry.metadata_value("TraceState").as_deref(),
            Some("congo=t61rcWkgMzE")
        );

        telemetry.clear_operation_state();
        assert_eq!(telemetry.metadata_value("TraceState"), None);
    }

    #[test]
    fn trace_state_shares_the_slot_with_a_caller_key() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry.add_metadata("TraceState", "caller-value").unwrap();
        telemetry.set_operation_state("congo=t61rcWkgMzE");
        assert_eq!(
            telemetry.metadata_value("tracestate").as_deref(),
            Some("congo=t61rcWkgMzE")
        );

        telemetry.clear_operation_state();
        assert_eq!(telemetry.metadata_value("TraceState"), None);
    }

    #[test]
    fn user_context_set_and_clear() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        let user = UserContext {
            id: Some("u-1".to_string()),
            authenticated_id: Some("alice".to_string()),
            account_id: Some("acct-7".to_string()),
            user_agent: Some("curl/8".to_string()),
        };
        telemetry.set_user_context(user.clone());
        assert_eq!(telemetry.user_context(), user);

        telemetry.clear_user_context();
        assert!(telemetry.user_context().is_empty());
        assert_eq!(sink.users.lock().len(), 2);
    }

    #[test]
    fn write_event_stored_metadata_wins_over_per_call_map() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);
        telemetry.add_metadata("Tenant", "acme").unwrap();

        let mut extra = HashMap::new();
        extra.insert("application".to_string(), "spoofed".to_string());
        extra.insert("RequestPath".to_string(), "/orders".to_string());

        telemetry.write_event("order-created", Some(&extra));

        let events = sink.events.lock();
        let (name, metadata) = &events[0];
        assert_eq!(name, "order-created");
        assert_eq!(metadata.get("Application"), Some("MyApp"));
        assert_eq!(metadata.get("Tenant"), Some("acme"));
        assert_eq!(metadata.get("RequestPath"), Some("/orders"));
    }

    #[test]
    fn write_trace_without_extra_forwards_the_stored_set() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);
        telemetry.add_metadata("Tenant", "acme").unwrap();

        telemetry.write_trace("starting up", Severity::Information, None);

        let traces = sink.traces.lock();
        let (message, severity, metadata) = &traces[0];
        assert_eq!(message, "starting up");
        assert_eq!(*severity, Severity::Information);
        assert_eq!(metadata.to_map(), telemetry.metadata_snapshot().to_map());
    }

    #[test]
    fn write_exception_captures_the_error() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer went away");
        telemetry.write_exception(&error, None);

        let exceptions = sink.exceptions.lock();
        let (record, metadata) = &exceptions[0];
        assert_eq!(record.message, "peer went away");
        assert_eq!(metadata.get("Application"), Some("MyApp"));
    }

    #[test]
    fn write_request_attaches_url_and_overrides_id() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        telemetry
            .write_request(
                "GET /orders",
                Utc::now(),
                Duration::from_millis(12),
                "200",
                true,
                Some("https://example.com/orders"),
                Some("req-42"),
            )
            .unwrap();

        let requests = sink.requests.lock();
        assert_eq!(requests[0].id, "req-42");
        assert_eq!(
            requests[0].url.as_ref().map(|u| u.as_str()),
            Some("https://example.com/orders")
        );
    }

    #[test]
    fn write_request_rejects_malformed_url_and_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        let err = telemetry
            .write_request(
                "GET /orders",
                Utc::now(),
                Duration::ZERO,
                "200",
                true,
                Some("not a url"),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFormat(_)));
        assert!(sink.requests.lock().is_empty());
    }

    #[test]
    fn write_dependency_stamps_the_full_metadata_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);
        telemetry.add_metadata("Tenant", "acme").unwrap();

        telemetry.write_dependency(
            "db01",
            "SQL",
            "select-orders",
            "SELECT * FROM orders",
            Utc::now(),
            Duration::from_millis(3),
            "",
            true,
        );

        let dependencies = sink.dependencies.lock();
        let record = &dependencies[0];
        assert!(record.result_code.is_none());
        assert_eq!(record.properties.get("Application"), Some("MyApp"));
        assert_eq!(record.properties.get("Tenant"), Some("acme"));
    }

    #[test]
    fn metric_suffix_equivalences() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);

        let _ = telemetry.metric("requests");
        let _ = telemetry.metric_with_suffix("requests", None);
        let _ = telemetry.metric_with_suffix("requests", Some(""));
        let _ = telemetry.metric_with_suffix("requests", Some("Ingest"));

        let lookups = sink.metric_lookups.lock();
        assert_eq!(lookups[0], lookups[1]);
        assert_eq!(lookups[0], lookups[2]);
        assert_ne!(lookups[0], lookups[3]);
        assert_eq!(lookups[0].qualified_name(), "MyApp.MyComponent.requests");
        assert_eq!(
            lookups[3].qualified_name(),
            "MyApp.MyComponent.Ingest.requests"
        );
    }

    #[test]
    fn owned_sink_is_shut_down_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let owned: Arc<dyn TelemetrySink> = Arc::clone(&sink) as Arc<dyn TelemetrySink>;
        let telemetry = TelemetryContext::builder("App", "Comp")
            .build(SinkBinding::Owned(owned))
            .unwrap();

        telemetry.close();
        telemetry.close();
        assert!(telemetry.is_closed());
        drop(telemetry);
        assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_sink_is_never_shut_down() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = context_with(&sink);
        telemetry.close();
        drop(telemetry);
        assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_mutation_loses_no_updates() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = Arc::new(context_with(&sink));

        let threads: usize = 8;
        let keys_per_thread: usize = 50;
        std::thread::scope(|scope| {
            for t in 0..threads {
                let telemetry = Arc::clone(&telemetry);
                scope.spawn(move || {
                    for k in 0..keys_per_thread {
                        let key = format!("key-{t}-{k}");
                        telemetry.add_metadata(&key, "v").unwrap();
                        // protected keys must reject mutation from every thread
                        assert!(telemetry.add_metadata("Application", "x").is_err());
                    }
                });
            }
        });

        let snapshot = telemetry.metadata_snapshot();
        assert_eq!(snapshot.len(), 2 + threads * keys_per_thread);
        for t in 0..threads {
            for k in 0..keys_per_thread {
                assert_eq!(snapshot.get(&format!("key-{t}-{k}")), Some("v"));
            }
        }
        assert_eq!(snapshot.get("Application"), Some("MyApp"));
    }

    #[test]
    fn concurrent_removal_serializes_cleanly() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = Arc::new(context_with(&sink));
        for i in 0..100 {
            telemetry.add_metadata(&format!("key-{i}"), "v").unwrap();
        }

        std::thread::scope(|scope| {
            for t in 0..4 {
                let telemetry = Arc::clone(&telemetry);
                scope.spawn(move || {
                    for i in (t..100).step_by(4) {
                        telemetry.remove_metadata(&format!("key-{i}")).unwrap();
                    }
                });
            }
        });

        assert_eq!(telemetry.metadata_snapshot().len(), 2);
    }
}
