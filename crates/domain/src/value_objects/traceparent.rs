//! W3C trace-context header value object
//!
//! A `traceparent` header is four hyphen-delimited parts:
//! `version-traceid-parentid-flags`. Version and flags are two hex digits
//! each; the trace and parent identifiers are carried verbatim so the
//! context stays interoperable with upstream services that send
//! non-conforming identifier lengths.
//!
//! # Examples
//!
//! ```
//! use domain::TraceParent;
//!
//! let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
//! let parsed: TraceParent = header.parse().unwrap();
//!
//! assert_eq!(parsed.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
//! assert_eq!(parsed.parent_id(), "00f067aa0ba902b7");
//! assert_eq!(parsed.version(), 0);
//! assert!(parsed.sampled());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TelemetryError;

/// A decoded `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceParent {
    version: u8,
    trace_id: String,
    parent_id: String,
    flags: u8,
}

fn parse_hex_byte(part: &str, field: &str) -> Result<u8, TelemetryError> {
    if part.len() != 2 {
        return Err(TelemetryError::invalid_format(format!(
            "traceparent {field} must be exactly 2 hex digits, got '{part}'"
        )));
    }
    u8::from_str_radix(part, 16).map_err(|_| {
        TelemetryError::invalid_format(format!(
            "traceparent {field} is not valid hexadecimal: '{part}'"
        ))
    })
}

impl TraceParent {
    /// Header version (`00` for the current W3C revision)
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// The distributed trace identifier
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The identifier of the calling span
    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// The raw trace flags byte
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Whether the caller requested sampling (bit 0 of the flags)
    #[must_use]
    pub const fn sampled(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

impl FromStr for TraceParent {
    type Err = TelemetryError;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = header.split('-').collect();
        if parts.len() != 4 {
            return Err(TelemetryError::invalid_format(format!(
                "traceparent header has {} parts, expected 4",
                parts.len()
            )));
        }

        let version = parse_hex_byte(parts[0], "version")?;
        let flags = parse_hex_byte(parts[3], "flags")?;

        Ok(Self {
            version,
            trace_id: parts[1].to_string(),
            parent_id: parts[2].to_string(),
            flags,
        })
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}-{}-{}-{:02x}",
            self.version, self.trace_id, self.parent_id, self.flags
        )
    }
}
