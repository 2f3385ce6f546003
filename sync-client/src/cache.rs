//! Local cache of records, cursor and pending changes.
//!
//! Every blob is written as a complete snapshot; nothing is patched in
//! place. Unreadable blobs are treated as absent: the failure is logged and
//! the caller gets an empty record set, no cursor, or an empty ledger.

use std::fmt;
use std::sync::Arc;

use quotesync_core::{ChangeLedger, RecordSet};
use quotesync_types::{SyncCursor, SyncError, ZoneId};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::kv::{KeyValueStore, StoreError};
use crate::SyncConfig;

/// The durable local state shared by the UI-facing store and the
/// coordinator.
///
/// Clones share the same store and write lock.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
    records_key: Arc<str>,
    cursor_key: Arc<str>,
    ledger_key: Arc<str>,
    write: Arc<Mutex<()>>,
}

impl fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("records_key", &self.records_key)
            .field("cursor_key", &self.cursor_key)
            .field("ledger_key", &self.ledger_key)
            .finish_non_exhaustive()
    }
}

impl LocalCache {
    /// Create a cache over `store` using the keys from `config`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            records_key: config.records_key.as_str().into(),
            cursor_key: config.cursor_key.as_str().into(),
            ledger_key: config.ledger_key.as_str().into(),
            write: Arc::new(Mutex::new(())),
        }
    }

    /// Load the persisted record set.
    ///
    /// Returns an empty set if nothing is stored or the blob is unreadable.
    pub async fn load(&self) -> RecordSet {
        self.read_json(&self.records_key, "records")
            .await
            .unwrap_or_default()
    }

    /// Overwrite the persisted record set with a complete snapshot.
    pub async fn replace(&self, records: &RecordSet) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.write_records(records).await
    }

    /// Load, modify and write back the record set as one step.
    ///
    /// Nothing is written when `apply` fails.
    pub async fn update<T, E, F>(&self, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut RecordSet) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self.write.lock().await;
        let mut records = self.load().await;
        let value = apply(&mut records)?;
        self.write_records(&records).await?;
        Ok(value)
    }

    /// Delete the persisted record set.
    pub async fn wipe(&self) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        let removed = self.store.remove(&self.records_key).await?;
        tracing::info!("Removed all cached records (blob present: {})", removed);
        Ok(())
    }

    /// Load the persisted cursor, if any.
    pub async fn load_cursor(&self) -> Option<SyncCursor> {
        self.read_json(&self.cursor_key, "sync cursor").await
    }

    /// Persist a cursor.
    pub async fn save_cursor(&self, cursor: &SyncCursor) -> Result<(), StoreError> {
        let bytes = SyncError::to_json(cursor)?;
        self.store.put(&self.cursor_key, &bytes).await
    }

    /// Forget the persisted cursor.
    pub async fn clear_cursor(&self) -> Result<(), StoreError> {
        self.store.remove(&self.cursor_key).await.map(|_| ())
    }

    /// Load the persisted ledger, or an empty ledger for `zone`.
    ///
    /// A ledger persisted for a different zone is discarded.
    pub async fn load_ledger(&self, zone: &ZoneId) -> ChangeLedger {
        match self
            .read_json::<ChangeLedger>(&self.ledger_key, "pending changes")
            .await
        {
            Some(ledger) if ledger.zone() == zone => ledger,
            Some(ledger) => {
                tracing::warn!(
                    "Discarding pending changes for zone {} (configured zone is {})",
                    ledger.zone(),
                    zone
                );
                ChangeLedger::new(zone.clone())
            }
            None => ChangeLedger::new(zone.clone()),
        }
    }

    /// Persist the ledger.
    pub async fn save_ledger(&self, ledger: &ChangeLedger) -> Result<(), StoreError> {
        let bytes = SyncError::to_json(ledger)?;
        self.store.put(&self.ledger_key, &bytes).await
    }

    async fn write_records(&self, records: &RecordSet) -> Result<(), StoreError> {
        let bytes = SyncError::to_json(records)?;
        self.store.put(&self.records_key, &bytes).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str, what: &str) -> Option<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read cached {}: {}", what, e);
                return None;
            }
        };
        match SyncError::from_json(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached {} are unreadable, ignoring them: {}", what, e);
                None
            }
        }
    }
}
