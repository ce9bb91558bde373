//! Operation, user, and cloud-role context records
//!
//! These are transient: they describe the distributed operation and user
//! a context is currently attributing telemetry to, and are cleared
//! independently of the metadata set.

use serde::{Deserialize, Serialize};

use crate::value_objects::TraceParent;

/// The distributed operation telemetry is currently attributed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Distributed trace identifier
    pub trace_id: Option<String>,
    /// Identifier of the calling span
    pub parent_id: Option<String>,
    /// Logical operation name
    pub name: Option<String>,
    /// Version byte of the header that set this context, if any
    pub header_version: Option<u8>,
    /// Flags byte of the header that set this context, if any
    pub header_flags: Option<u8>,
}

impl OperationContext {
    /// Build from raw identifiers, no validation
    #[must_use]
    pub fn from_parts(
        trace_id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<&str>,
    ) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            parent_id: parent_id.map(ToString::to_string),
            name: Some(name.into()),
            header_version: None,
            header_flags: None,
        }
    }

    /// Build from a decoded traceparent header
    #[must_use]
    pub fn from_traceparent(header: &TraceParent, name: impl Into<String>) -> Self {
        Self {
            trace_id: Some(header.trace_id().to_string()),
            parent_id: Some(header.parent_id().to_string()),
            name: Some(name.into()),
            header_version: Some(header.version()),
            header_flags: Some(header.flags()),
        }
    }

    /// Whether no operation is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.parent_id.is_none() && self.name.is_none()
    }
}

/// The user telemetry is currently attributed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Anonymous user identifier
    pub id: Option<String>,
    /// Authenticated user identifier
    pub authenticated_id: Option<String>,
    /// Account the user belongs to
    pub account_id: Option<String>,
    /// User agent of the client
    pub user_agent: Option<String>,
}

impl UserContext {
    /// Build a context carrying only the anonymous identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Whether no user is set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.authenticated_id.is_none()
            && self.account_id.is_none()
            && self.user_agent.is_none()
    }
}

/// Cloud role identity stamped onto outgoing telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRole {
    /// Logical role name, e.g. the service name
    pub name: String,
    /// Role instance, e.g. the host or pod name
    pub instance: String,
}

impl CloudRole {
    /// Build a role identity
    #[must_use]
    pub fn new(name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
        }
    }
}
