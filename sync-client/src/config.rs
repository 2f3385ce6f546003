//! Coordinator configuration.

use quotesync_types::{SyncError, ZoneId};

/// Default remote database.
pub const DEFAULT_DATABASE: &str = "private";
/// Default zone holding the records.
pub const DEFAULT_ZONE: &str = "Quotes";
/// Default remote record type.
pub const DEFAULT_RECORD_TYPE: &str = "Quote";
/// Default key of the persisted record blob.
pub const DEFAULT_RECORDS_KEY: &str = "AllQuotes";
/// Default key of the persisted cursor blob.
pub const DEFAULT_CURSOR_KEY: &str = "syncToken";
/// Default key of the persisted ledger blob.
pub const DEFAULT_LEDGER_KEY: &str = "pendingChanges";
/// Default maximum number of record changes per outbound batch.
pub const DEFAULT_BATCH_LIMIT: usize = 400;

/// Configuration for [`SyncCoordinator`](crate::SyncCoordinator) and
/// [`LocalCache`](crate::LocalCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remote database the session is opened against.
    pub database: String,
    /// Zone holding every record.
    pub zone: String,
    /// Remote record type.
    pub record_type: String,
    /// Key of the record blob.
    pub records_key: String,
    /// Key of the cursor blob.
    pub cursor_key: String,
    /// Key of the pending-change ledger blob.
    pub ledger_key: String,
    /// Maximum record changes handed to the remote per batch.
    pub batch_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            records_key: DEFAULT_RECORDS_KEY.to_string(),
            cursor_key: DEFAULT_CURSOR_KEY.to_string(),
            ledger_key: DEFAULT_LEDGER_KEY.to_string(),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote database.
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the zone name.
    pub fn with_zone(mut self, zone: &str) -> Self {
        self.zone = zone.to_string();
        self
    }

    /// Set the record type.
    pub fn with_record_type(mut self, record_type: &str) -> Self {
        self.record_type = record_type.to_string();
        self
    }

    /// Set the keys of the three persisted blobs.
    pub fn with_keys(mut self, records: &str, cursor: &str, ledger: &str) -> Self {
        self.records_key = records.to_string();
        self.cursor_key = cursor.to_string();
        self.ledger_key = ledger.to_string();
        self
    }

    /// Set the per-batch limit. Zero is treated as one.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// The configured zone as a validated id.
    pub fn zone_id(&self) -> Result<ZoneId, SyncError> {
        ZoneId::new(self.zone.clone())
    }
}
