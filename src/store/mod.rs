//! Persistence for attempt records.
//!
//! The limiter talks to storage through [`KeyValueStore`], a synchronous
//! string-keyed store with optional per-entry TTL. [`AttemptStore`] layers the
//! record format and key namespace on top of it.

mod attempts;
mod file;
mod memory;

pub use attempts::AttemptStore;
pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::ratelimit::clock::duration_millis;

/// Trait for key-value store implementations.
///
/// Values are opaque strings. Expired entries must read as absent; removing
/// them eagerly is optional.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All live keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A stored value and its optional expiry (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StoredEntry {
    pub fn new(value: String, now: i64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now.saturating_add(duration_millis(ttl))),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}
