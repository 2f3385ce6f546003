//! Remote store abstraction for quotesync.
//!
//! This module describes the narrow interface the coordinator uses to talk to
//! a cloud record store. The store itself (storage engine, scheduling, retry
//! backoff) lives behind these traits.
//!
//! # Design
//!
//! - `RemoteConnector::open()` establishes a session, optionally resuming
//!   from a persisted cursor, and returns a channel of unsolicited events
//! - `RemoteSession::send_changes()` pulls outbound batches from a
//!   [`BatchSource`] until it is exhausted and reports what happened
//! - `RemoteSession::fetch_changes()` reports everything new since the
//!   session's position
//!
//! Both calls return the resulting [`SessionEvent`]s in order; the
//! coordinator handles them one at a time.

mod cloud;
mod file;
mod mock;

pub use file::FileCloud;
pub use mock::{FetchRecord, MockCloud};

use async_trait::async_trait;
use quotesync_core::{BatchBuilder, BatchRequest, ChangeBatch};
use quotesync_types::{AccountChange, RecordId, RemoteRecord, SyncCursor, ZoneId};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Remote store errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No account is signed in.
    #[error("no account signed in")]
    NotSignedIn,

    /// The request did not reach the store.
    #[error("network error: {0}")]
    Network(String),

    /// The store's backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored remote state could not be read.
    #[error("corrupt remote state: {0}")]
    Corrupt(String),
}

/// Why the remote rejected one record change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The zone the record belongs to does not exist.
    ZoneNotFound,
    /// Anything worth retrying as-is on the next push.
    Transient,
}

/// A rejected record save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSave {
    /// The payload that was rejected.
    pub record: RemoteRecord,
    /// Failure class.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub message: String,
}

/// A rejected record deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    /// The record that could not be deleted.
    pub id: RecordId,
    /// Failure class.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub message: String,
}

/// Everything a remote session can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New resume point; persist it before anything else.
    StateUpdate {
        /// Opaque resume cursor.
        cursor: SyncCursor,
    },
    /// The account changed.
    AccountChange(AccountChange),
    /// Zone-level changes made elsewhere.
    FetchedDatabaseChanges {
        /// Zones that were deleted.
        deleted_zones: Vec<ZoneId>,
    },
    /// Record changes made elsewhere.
    FetchedRecordChanges {
        /// Created or updated records.
        modifications: Vec<RemoteRecord>,
        /// Deleted records.
        deletions: Vec<RecordId>,
    },
    /// Outcome of one outbound record batch.
    SentRecordChanges {
        /// Saved records as stored, carrying their new handles.
        saved: Vec<RemoteRecord>,
        /// Deleted record ids.
        deleted: Vec<RecordId>,
        /// Rejected saves.
        failed_saves: Vec<FailedSave>,
        /// Rejected deletions.
        failed_deletes: Vec<FailedDelete>,
    },
    /// Outcome of zone-level changes.
    SentDatabaseChanges {
        /// Zones created (or already present).
        saved_zones: Vec<ZoneId>,
        /// Zones deleted.
        deleted_zones: Vec<ZoneId>,
        /// Zone changes that failed, with reasons.
        failed_zones: Vec<(ZoneId, String)>,
    },
    /// A fetch is starting.
    WillFetchChanges,
    /// A fetch finished.
    DidFetchChanges,
    /// A send is starting.
    WillSendChanges,
    /// A send finished.
    DidSendChanges,
}

impl SessionEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate { .. } => "state update",
            Self::AccountChange(_) => "account change",
            Self::FetchedDatabaseChanges { .. } => "fetched database changes",
            Self::FetchedRecordChanges { .. } => "fetched record changes",
            Self::SentRecordChanges { .. } => "sent record changes",
            Self::SentDatabaseChanges { .. } => "sent database changes",
            Self::WillFetchChanges => "will fetch changes",
            Self::DidFetchChanges => "did fetch changes",
            Self::WillSendChanges => "will send changes",
            Self::DidSendChanges => "did send changes",
        }
    }
}

/// Supplies outbound batches on demand.
///
/// The remote session decides when to ask and how large a batch may be.
pub trait BatchSource {
    /// Next batch for `request`, or `None` when nothing in scope is left.
    fn next_batch(&mut self, request: &BatchRequest) -> Option<ChangeBatch>;
}

impl BatchSource for BatchBuilder<'_> {
    fn next_batch(&mut self, request: &BatchRequest) -> Option<ChangeBatch> {
        BatchBuilder::next_batch(self, request)
    }
}

/// Parameters for opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Remote database.
    pub database: String,
    /// Zone holding the records.
    pub zone: ZoneId,
    /// Remote record type.
    pub record_type: String,
    /// Cursor to resume from; `None` means a full sync from scratch.
    pub resume: Option<SyncCursor>,
    /// Maximum record changes per outbound batch.
    pub batch_limit: usize,
}

/// An open session plus its stream of unsolicited events.
pub struct OpenedSession {
    /// The session.
    pub session: Box<dyn RemoteSession>,
    /// Events the remote pushes on its own (account changes and the like).
    pub events: UnboundedReceiver<SessionEvent>,
}

impl std::fmt::Debug for OpenedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSession").finish_non_exhaustive()
    }
}

/// Opens sessions against a remote store.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Open a session.
    async fn open(&self, config: SessionConfig) -> Result<OpenedSession, RemoteError>;
}

/// A session with a remote store.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Send everything `source` hands out, batch by batch.
    ///
    /// A transport failure fails the whole call; per-record rejections are
    /// reported in [`SessionEvent::SentRecordChanges`].
    async fn send_changes(
        &self,
        source: &mut (dyn BatchSource + Send),
    ) -> Result<Vec<SessionEvent>, RemoteError>;

    /// Fetch everything new since this session's position.
    async fn fetch_changes(&self) -> Result<Vec<SessionEvent>, RemoteError>;
}
