//! Key-value store persisted as a JSON document on disk.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{KeyValueStore, StoredEntry};
use crate::error::{GatekeepError, Result};
use crate::ratelimit::clock::{Clock, SystemClock};

type Document = BTreeMap<String, StoredEntry>;

/// A key-value store backed by a single JSON file.
///
/// The document is re-read under the lock before every operation, so
/// processes sharing one file see each other's writes and a mutation only
/// changes its own key. Each mutation is applied to a copy that only replaces
/// the cached document once it is on disk, written through a temporary file
/// and rename so a crash never leaves a torn file.
///
/// There is no lock across processes. Two processes whose read and rename
/// interleave resolve as last-writer-wins on the whole document, so the
/// earlier of the two writes is lost.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Document>,
    clock: Arc<dyn Clock>,
}

/// Read the document at `path`. A missing file is empty; an unparsable one
/// is logged and returned as `None`.
fn read_document(path: &Path) -> Result<Option<Document>> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable store file");
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Some(Document::new())),
        Err(e) => Err(e.into()),
    }
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open the store at `path`, using `clock` for expiry.
    ///
    /// An unreadable document is logged and replaced by an empty store
    /// rather than refusing to start.
    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_document(&path)?.unwrap_or_default();

        info!(path = %path.display(), entries = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            clock,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-process scratch file the document is written to before the rename.
    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension(format!("tmp.{}", std::process::id()))
    }

    /// Replace the cached document with what is on disk. An unreadable file
    /// keeps the cache until the next successful write replaces it.
    fn refresh(&self, entries: &mut Document) -> Result<()> {
        if let Some(document) = read_document(&self.path)? {
            *entries = document;
        }
        Ok(())
    }

    /// Apply `mutate` to a fresh copy of the document and persist it. The
    /// cache only takes the new document once the write has succeeded.
    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let mut entries = self.entries.lock();
        self.refresh(&mut entries)?;

        let mut next = entries.clone();
        if !mutate(&mut next) {
            return Ok(());
        }

        self.flush(&mut next)?;
        *entries = next;
        Ok(())
    }

    /// Write the document, dropping expired entries.
    fn flush(&self, entries: &mut Document) -> Result<()> {
        let now = self.clock.now_millis();
        entries.retain(|_, entry| !entry.is_expired(now));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            GatekeepError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), entries = entries.len(), "Flushed file store");
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.refresh(&mut entries)?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let entry = StoredEntry::new(value, self.clock.now_millis(), ttl);
        self.update(|entries| {
            entries.insert(key.to_string(), entry);
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.refresh(&mut entries)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gatekeep-{}", uuid::Uuid::new_v4()))
            .join("store.json")
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = temp_path();

        {
            let store = FileStore::open(&path).unwrap();
            store.set("rate_limit:login:u1", "{}".to_string(), None).unwrap();
            store.set("rate_limit:login:u2", "{}".to_string(), None).unwrap();
            store.remove("rate_limit:login:u2").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("rate_limit:login:u1").unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get("rate_limit:login:u2").unwrap(), None);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = temp_path();
        let store = FileStore::open(&path).unwrap();
        assert!(store.keys("").unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys("").unwrap().is_empty());

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_keys_prefix_and_expiry() {
        let path = temp_path();
        let clock = Arc::new(ManualClock::from_millis(0));
        let store = FileStore::open_with_clock(&path, clock.clone()).unwrap();

        store.set("a:1", "x".to_string(), None).unwrap();
        store.set("a:2", "x".to_string(), Some(Duration::from_secs(5))).unwrap();
        store.set("b:1", "x".to_string(), None).unwrap();

        assert_eq!(store.keys("a:").unwrap(), vec!["a:1".to_string(), "a:2".to_string()]);

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.keys("a:").unwrap(), vec!["a:1".to_string()]);
        assert_eq!(store.get("a:2").unwrap(), None);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_failed_write_is_not_applied() {
        let path = temp_path();
        let store = FileStore::open(&path).unwrap();
        store.set("rate_limit:login:u1", "first".to_string(), None).unwrap();

        // A directory in place of the scratch file makes every write fail
        fs::create_dir_all(store.tmp_path()).unwrap();

        assert!(store.set("rate_limit:login:u1", "second".to_string(), None).is_err());
        assert!(store.set("rate_limit:login:u2", "new".to_string(), None).is_err());
        assert!(store.remove("rate_limit:login:u1").is_err());

        assert_eq!(store.get("rate_limit:login:u1").unwrap().as_deref(), Some("first"));
        assert_eq!(store.get("rate_limit:login:u2").unwrap(), None);
        assert_eq!(store.keys("rate_limit:").unwrap(), vec!["rate_limit:login:u1".to_string()]);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_shared_file_keeps_writes_to_other_keys() {
        let path = temp_path();
        let first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path).unwrap();

        first.set("rate_limit:login:u1", "a".to_string(), None).unwrap();
        second.set("rate_limit:signup:u2", "b".to_string(), None).unwrap();
        first.set("rate_limit:login:u3", "c".to_string(), None).unwrap();

        assert_eq!(second.get("rate_limit:login:u3").unwrap().as_deref(), Some("c"));

        second.remove("rate_limit:login:u1").unwrap();
        assert_eq!(first.get("rate_limit:login:u1").unwrap(), None);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.keys("rate_limit:").unwrap(),
            vec!["rate_limit:login:u3".to_string(), "rate_limit:signup:u2".to_string()]
        );

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
