//! Composite storage keys for attempt records.

use std::fmt;

use super::rules::Endpoint;

/// Default key namespace for attempt records.
pub const DEFAULT_NAMESPACE: &str = "rate_limit";

/// A key that uniquely identifies an attempt record.
///
/// Format: `{namespace}:{endpoint}:{identifier}`. Identifiers may themselves
/// contain `:`, so parsing splits only on the first two separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    /// The guarded endpoint
    pub endpoint: Endpoint,
    /// The tracking identifier (user id, hashed email, or `anonymous`)
    pub identifier: String,
}

impl AttemptKey {
    /// Create a new attempt key.
    pub fn new(endpoint: Endpoint, identifier: &str) -> Self {
        Self {
            endpoint,
            identifier: identifier.to_string(),
        }
    }

    /// Render the persisted key under `namespace`.
    pub fn to_storage_key(&self, namespace: &str) -> String {
        format!("{}:{}:{}", namespace, self.endpoint, self.identifier)
    }

    /// The prefix shared by every key in `namespace`.
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}:", namespace)
    }

    /// Parse a persisted key.
    ///
    /// Returns `None` for keys outside `namespace` or naming an unknown endpoint.
    pub fn from_storage_key(namespace: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(namespace)?.strip_prefix(':')?;
        let (endpoint, identifier) = rest.split_once(':')?;
        let endpoint = endpoint.parse().ok()?;

        Some(Self {
            endpoint,
            identifier: identifier.to_string(),
        })
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.identifier)
    }
}
