//! Snapshot persistence
//!
//! The cache writes a JSON list of `(key, entry)` pairs to a key/value string
//! store so a restarted process can resume with whatever is still live. The
//! store is opaque: anything that can get, set and remove a string by key.

use crate::cache::CacheEntry;
use crate::key::CacheKey;
use async_trait::async_trait;
use parking_lot::RwLock;
use query_core::{QueryError, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Key/value string store used for cache snapshots
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read the value stored under `key`, if any
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set_string(&self, key: &str, value: String) -> Result<()>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, mainly for tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: String) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Store keeping one file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory snapshots are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_string(&self, key: &str, value: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        // Write beside the target and rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialize snapshot entries
pub(crate) fn encode_snapshot(entries: &[(CacheKey, CacheEntry)]) -> Result<String> {
    serde_json::to_string(entries).map_err(QueryError::from)
}

/// Parse a stored snapshot
pub(crate) fn decode_snapshot(raw: &str) -> Result<Vec<(CacheKey, CacheEntry)>> {
    serde_json::from_str(raw).map_err(QueryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_string("k").await.unwrap(), None);

        store.set_string("k", "v1".to_string()).await.unwrap();
        store.set_string("k", "v2".to_string()).await.unwrap();
        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("v2"));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("snapshots"));

        assert_eq!(store.get_string("query_cache").await.unwrap(), None);

        store
            .set_string("query_cache", "[]".to_string())
            .await
            .unwrap();
        assert_eq!(
            store.get_string("query_cache").await.unwrap().as_deref(),
            Some("[]")
        );
        assert!(dir.path().join("snapshots/query_cache.json").exists());

        store.remove("query_cache").await.unwrap();
        assert_eq!(store.get_string("query_cache").await.unwrap(), None);
        store.remove("query_cache").await.unwrap();
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let store = FileStore::new("/tmp/cache");
        assert_eq!(
            store.path_for("../escape/me"),
            PathBuf::from("/tmp/cache/___escape_me.json")
        );
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_entries() {
        let key = CacheKey::new("courses", &json!({"status": "active"})).unwrap();
        let entry = CacheEntry::new(
            Arc::new(json!(["c1"])),
            1_000,
            Duration::from_secs(60),
        );

        let raw = encode_snapshot(&[(key.clone(), entry.clone())]).unwrap();
        let decoded = decode_snapshot(&raw).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, key);
        assert_eq!(*decoded[0].1.value, json!(["c1"]));
        assert_eq!(decoded[0].1.created_at, 1_000);
        assert_eq!(decoded[0].1.ttl_ms, 60_000);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let err = decode_snapshot("{not json").unwrap_err();
        assert!(matches!(err, QueryError::SerializationError(_)));
    }
}
