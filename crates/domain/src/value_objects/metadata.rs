//! Case-insensitive metadata map with protected entries
//!
//! Every telemetry record leaving a context carries a set of string
//! dimensions. The dimensions seeded at construction (`Application`,
//! `Component`, optionally `Module`) are protected: they survive every
//! mutation the owning application performs afterwards.
//!
//! # Examples
//!
//! ```
//! use domain::MetadataMap;
//!
//! let mut metadata = MetadataMap::new();
//! metadata.seed("Application", "Billing").unwrap();
//! metadata.insert("Tenant", "acme").unwrap();
//!
//! // Lookups fold case
//! assert_eq!(metadata.get("application"), Some("Billing"));
//!
//! // Protected entries reject mutation
//! assert!(metadata.insert("APPLICATION", "other").is_err());
//! assert!(metadata.remove("Application").is_err());
//! ```

use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::errors::TelemetryError;

/// A single metadata entry, tagged with its protection status
#[derive(Debug, Clone)]
struct MetadataEntry {
    /// Key casing as first inserted, used for emission
    key: String,
    value: String,
    protected: bool,
}

/// Mapping from case-insensitive key to value
///
/// Keys are folded for lookup but keep the casing of their first
/// insertion for emission. Protection is a property of the entry itself,
/// checked in constant time on every mutation.
#[derive(Debug, Clone, Default)]
pub struct MetadataMap {
    entries: HashMap<String, MetadataEntry>,
}

fn fold(key: &str) -> String {
    key.to_lowercase()
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl MetadataMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a protected entry
    ///
    /// Both key and value must contain non-whitespace content. Seeded
    /// entries can never be overwritten or removed through [`insert`]
    /// and [`remove`].
    ///
    /// [`insert`]: MetadataMap::insert
    /// [`remove`]: MetadataMap::remove
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidArgument` if the key or value is
    /// empty or whitespace-only.
    pub fn seed(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TelemetryError> {
        let key = key.into();
        let value = value.into();
        if is_blank(&key) {
            return Err(TelemetryError::InvalidArgument(
                "metadata key cannot be empty or whitespace".to_string(),
            ));
        }
        if is_blank(&value) {
            return Err(TelemetryError::InvalidArgument(format!(
                "metadata value for '{key}' cannot be empty or whitespace"
            )));
        }
        self.entries.insert(
            fold(&key),
            MetadataEntry {
                key,
                value,
                protected: true,
            },
        );
        Ok(())
    }

    /// Insert or overwrite a non-protected entry (last write wins)
    ///
    /// Overwriting keeps the key casing of the original insertion.
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::InvalidArgument` for a blank key and
    /// `TelemetryError::ProtectedKey` when the key matches a protected
    /// entry, leaving the map untouched in both cases.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TelemetryError> {
        let key = key.into();
        if is_blank(&key) {
            return Err(TelemetryError::InvalidArgument(
                "metadata key cannot be empty or whitespace".to_string(),
            ));
        }
        let folded = fold(&key);
        match self.entries.get_mut(&folded) {
            Some(entry) if entry.protected => Err(TelemetryError::protected_key(key)),
            Some(entry) => {
                entry.value = value.into();
                Ok(())
            }
            None => {
                self.entries.insert(
                    folded,
                    MetadataEntry {
                        key,
                        value: value.into(),
                        protected: false,
                    },
                );
                Ok(())
            }
        }
    }

    /// Remove a non-protected entry; absent keys are a no-op
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::ProtectedKey` when the key matches a
    /// protected entry.
    pub fn remove(&mut self, key: &str) -> Result<(), TelemetryError> {
        let folded = fold(key);
        match self.entries.get(&folded) {
            Some(entry) if entry.protected => Err(TelemetryError::protected_key(key)),
            Some(_) => {
                self.entries.remove(&folded);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Remove every non-protected entry
    ///
    /// Idempotent: protected entries survive any number of resets.
    pub fn reset(&mut self) {
        self.entries.retain(|_, entry| entry.protected);
    }

    /// Look up a value, folding case
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&fold(key)).map(|e| e.value.as_str())
    }

    /// Whether a key is present, folding case
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold(key))
    }

    /// Whether a key matches a protected entry
    #[must_use]
    pub fn is_protected(&self, key: &str) -> bool {
        self.entries
            .get(&fold(key))
            .is_some_and(|e| e.protected)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries as `(key, value)` with emission casing
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// This map written over `base`: the result starts from the caller's
    /// per-call data and every stored entry overwrites on key collision.
    ///
    /// The merge direction is load-bearing: stored context dimensions
    /// always win over per-call data.
    #[must_use]
    pub fn merged_over(&self, base: &HashMap<String, String>) -> Self {
        let mut result = Self::new();
        for (key, value) in base {
            result.entries.insert(
                fold(key),
                MetadataEntry {
                    key: key.clone(),
                    value: value.clone(),
                    protected: false,
                },
            );
        }
        for entry in self.entries.values() {
            result.entries.insert(fold(&entry.key), entry.clone());
        }
        result
    }

    /// Plain owned snapshot of the entries
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl Serialize for MetadataMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut sorted: Vec<(&str, &str)> = self.iter().collect();
        sorted.sort_unstable_by_key(|(k, _)| *k);
        let mut map = serializer.serialize_map(Some(sorted.len()))?;
        for (key, value) in sorted {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
