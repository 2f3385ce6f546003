//! # sync-client
//!
//! Client library for quotesync record sync.
//!
//! This is the main library that applications use to keep a local quote
//! list in sync with a cloud record store.
//!
//! ## Features
//!
//! - **Snapshot Persistence**: records, cursor and pending changes are each
//!   written as one complete blob, never patched in place
//! - **Resumable Sync**: the remote's cursor is persisted after every state
//!   update so a restart resumes instead of starting over
//! - **Remote Abstraction**: pluggable remote store (directory-backed, mock)
//! - **Pure State Machine**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use quotesync_client::{FileCloud, FileKv, QuoteStore, SyncConfig, SyncCoordinator};
//!
//! let store = Arc::new(FileKv::open("data/store").await?);
//! let cloud = Arc::new(FileCloud::new("shared/cloud"));
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), store, cloud).await?;
//! coordinator.initialize().await?;
//!
//! let quotes = QuoteStore::open(coordinator.clone()).await;
//! quotes.save(Record::new("Simplicity is prerequisite for reliability.")).await?;
//!
//! coordinator.push_local_changes().await?;
//! coordinator.pull_remote_changes().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod kv;
pub mod quotes;
pub mod remote;

pub use cache::LocalCache;
pub use config::SyncConfig;
pub use coordinator::{CoordinatorError, PendingFailure, SyncCoordinator, SyncStatus};
pub use kv::{FileKv, KeyValueStore, MemoryKv, StoreError};
pub use quotes::QuoteStore;
pub use remote::{
    BatchSource, FailedDelete, FailedSave, FailureKind, FetchRecord, FileCloud, MockCloud,
    OpenedSession, RemoteConnector, RemoteError, RemoteSession, SessionConfig, SessionEvent,
};

// Re-exported so applications need only this crate
pub use quotesync_core::{CoordinatorState, SyncOutcome};
pub use quotesync_types::{Record, RecordId, RemoteHandle, SyncCursor, ZoneId};
