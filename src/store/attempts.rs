//! Attempt record persistence.

use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use super::KeyValueStore;
use crate::error::Result;
use crate::ratelimit::key::{AttemptKey, DEFAULT_NAMESPACE};
use crate::ratelimit::AttemptRecord;

/// Maps `(endpoint, identifier)` pairs to persisted [`AttemptRecord`]s.
///
/// Reads fail open: a missing, malformed or unreadable entry loads as `None`
/// so that one bad entry can never lock a user out permanently.
#[derive(Clone)]
pub struct AttemptStore {
    kv: Arc<dyn KeyValueStore>,
    namespace: String,
    ttl: Option<Duration>,
}

impl AttemptStore {
    /// Create a store over `kv` using the default namespace and no TTL.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: None,
        }
    }

    /// Use a different key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Expire records that have not been written for `ttl`.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The key namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Load the record for `key`.
    pub fn load(&self, key: &AttemptKey) -> Option<AttemptRecord> {
        let storage_key = key.to_storage_key(&self.namespace);

        let raw = match self.kv.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Failed to read attempt record, treating as absent");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Corrupt attempt record, treating as absent");
                None
            }
        }
    }

    /// Persist the record for `key`.
    pub fn save(&self, key: &AttemptKey, record: &AttemptRecord) -> Result<()> {
        let storage_key = key.to_storage_key(&self.namespace);
        let raw = serde_json::to_string(record)?;

        trace!(key = %storage_key, "Saving attempt record");
        self.kv.set(&storage_key, raw, self.ttl)
    }

    /// Delete the record for `key`.
    pub fn remove(&self, key: &AttemptKey) -> Result<()> {
        self.kv.remove(&key.to_storage_key(&self.namespace))
    }

    /// Every attempt key persisted in this namespace.
    ///
    /// Keys naming unknown endpoints are skipped.
    pub fn keys(&self) -> Result<Vec<AttemptKey>> {
        let prefix = AttemptKey::namespace_prefix(&self.namespace);
        Ok(self
            .kv
            .keys(&prefix)?
            .iter()
            .filter_map(|raw| AttemptKey::from_storage_key(&self.namespace, raw))
            .collect())
    }
}

impl std::fmt::Debug for AttemptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptStore")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish()
    }
}
