//! Metric namespace and identifier value objects
//!
//! All metrics emitted through a context share one namespace derived from
//! its dimensions: `Application.Component` or
//! `Application.Component.Module`. The namespace is fixed at construction;
//! a per-call suffix may widen it without persisting.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::TelemetryError;

/// The dot-joined namespace prefix shared by every metric of a context
///
/// # Examples
///
/// ```
/// use domain::MetricNamespace;
///
/// let ns = MetricNamespace::new("Billing", "Invoices", Some("Pdf")).unwrap();
/// assert_eq!(ns.as_str(), "Billing.Invoices.Pdf");
///
/// let ns = MetricNamespace::new("Billing", "Invoices", None).unwrap();
/// assert_eq!(ns.as_str(), "Billing.Invoices");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricNamespace {
    value: String,
}

impl MetricNamespace {
    /// Derive the namespace from the context dimensions
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::MissingArgument` when application or
    /// component is blank, and `TelemetryError::InvalidArgument` when a
    /// module is supplied but blank.
    pub fn new(
        application: &str,
        component: &str,
        module: Option<&str>,
    ) -> Result<Self, TelemetryError> {
        if application.trim().is_empty() {
            return Err(TelemetryError::MissingArgument("application"));
        }
        if component.trim().is_empty() {
            return Err(TelemetryError::MissingArgument("component"));
        }
        let value = match module {
            Some(module) if module.trim().is_empty() => {
                return Err(TelemetryError::InvalidArgument(
                    "module cannot be empty or whitespace".to_string(),
                ));
            }
            Some(module) => format!("{application}.{component}.{module}"),
            None => format!("{application}.{component}"),
        };
        Ok(Self { value })
    }

    /// The namespace as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The namespace widened by a per-call suffix
    ///
    /// A `None`, empty, or whitespace-only suffix yields the bare
    /// namespace; the stored value is never changed.
    #[must_use]
    pub fn with_suffix(&self, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) if !suffix.trim().is_empty() => {
                format!("{}.{suffix}", self.value)
            }
            _ => self.value.clone(),
        }
    }
}

impl fmt::Display for MetricNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Identifies one aggregation series: `(namespace[.suffix], name)`
///
/// Identifier equality is what ties repeated lookups to the same series,
/// so the construction must be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricIdentifier {
    namespace: String,
    name: String,
}

impl MetricIdentifier {
    /// Build an identifier from a namespace, optional suffix, and name
    #[must_use]
    pub fn new(namespace: &MetricNamespace, suffix: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.with_suffix(suffix),
            name: name.to_string(),
        }
    }

    /// The effective namespace, suffix included
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The metric name within the namespace
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The fully qualified series name, `namespace.name`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for MetricIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}
