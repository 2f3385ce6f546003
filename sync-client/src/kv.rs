//! Key-value storage for persisted blobs.
//!
//! This module provides a trait for storing whole blobs under fixed string
//! keys, plus a memory-based implementation for testing and a file-based
//! implementation that replaces values atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use quotesync_types::SyncError;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("i/o error on '{key}': {source}")]
    Io {
        /// Key (or path) being accessed.
        key: String,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Key cannot be mapped to storage.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A value could not be encoded.
    #[error(transparent)]
    Encode(#[from] SyncError),
}

impl StoreError {
    fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// Trait for blob storage keyed by fixed names.
///
/// A `put` replaces the whole value; readers never observe a partial write.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value stored under `key`.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`.
    ///
    /// Returns `Ok(true)` if removed, `Ok(false)` if not found.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-memory key-value store for testing.
///
/// Clones share the same map. Not persistent.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.values().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    /// Overwrite a value with raw bytes, bypassing any encoding.
    pub fn insert_raw(&self, key: &str, value: &[u8]) {
        self.values().insert(key.to_string(), value.to_vec());
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.values().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values().remove(key).is_some())
    }
}

/// Directory-backed key-value store.
///
/// Each key is one file. Writes go to a temporary sibling first and are then
/// renamed over the target, so a crash mid-write leaves the previous value
/// intact. Files are created `0600`, the directory `0700` on Unix.
#[derive(Debug, Clone)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        set_permissions(&dir, 0o700).await?;
        Ok(Self { dir })
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::io(key, e))?;
        set_permissions(&tmp, 0o600).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}

/// Set Unix permissions on `path`. No-op on non-Unix platforms.
async fn set_permissions(path: &Path, mode: u32) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_kv_put_get_remove() {
        let kv = MemoryKv::new();
        assert!(kv.get("AllQuotes").await.unwrap().is_none());

        kv.put("AllQuotes", b"[]").await.unwrap();
        assert_eq!(kv.get("AllQuotes").await.unwrap(), Some(b"[]".to_vec()));
        assert_eq!(kv.len(), 1);

        assert!(kv.remove("AllQuotes").await.unwrap());
        assert!(!kv.remove("AllQuotes").await.unwrap());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn memory_kv_clone_shares_state() {
        let kv1 = MemoryKv::new();
        let kv2 = kv1.clone();

        kv1.put("syncToken", b"abc").await.unwrap();
        assert!(kv2.contains_key("syncToken"));
    }

    #[tokio::test]
    async fn file_kv_put_replaces_value() {
        let dir = tempdir().unwrap();
        let kv = FileKv::open(dir.path().join("store")).await.unwrap();

        kv.put("AllQuotes", b"first").await.unwrap();
        kv.put("AllQuotes", b"second").await.unwrap();

        assert_eq!(kv.get("AllQuotes").await.unwrap(), Some(b"second".to_vec()));
        assert!(!kv.dir().join(".AllQuotes.tmp").exists());
    }

    #[tokio::test]
    async fn file_kv_survives_interrupted_write() {
        let dir = tempdir().unwrap();
        let kv = FileKv::open(dir.path()).await.unwrap();
        kv.put("AllQuotes", b"complete snapshot").await.unwrap();

        // A crash after writing the temporary file but before the rename
        tokio::fs::write(kv.dir().join(".AllQuotes.tmp"), b"half a sna")
            .await
            .unwrap();

        let reopened = FileKv::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("AllQuotes").await.unwrap(),
            Some(b"complete snapshot".to_vec())
        );
    }

    #[tokio::test]
    async fn file_kv_remove_missing_is_false() {
        let dir = tempdir().unwrap();
        let kv = FileKv::open(dir.path()).await.unwrap();
        assert!(!kv.remove("syncToken").await.unwrap());
    }

    #[tokio::test]
    async fn file_kv_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let kv = FileKv::open(dir.path()).await.unwrap();

        let result = kv.put("../escape", b"x").await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        assert!(matches!(
            kv.get("").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_kv_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let kv = FileKv::open(&root).await.unwrap();
        kv.put("AllQuotes", b"[]").await.unwrap();

        let file = tokio::fs::metadata(root.join("AllQuotes")).await.unwrap();
        assert_eq!(file.permissions().mode() & 0o777, 0o600, "file should be 0600");
        let dir_meta = tokio::fs::metadata(&root).await.unwrap();
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700, "dir should be 0700");
    }
}
