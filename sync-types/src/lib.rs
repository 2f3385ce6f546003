//! # sync-types
//!
//! Data model types for quotesync.
//!
//! This crate provides the foundational types used across all quotesync crates:
//! - [`RecordId`], [`ZoneId`], [`SyncCursor`] - Identity and progress types
//! - [`Record`], [`RemoteHandle`], [`RemoteRecord`] - The synchronizable entity
//!   and its remote-side representation
//! - [`PendingAction`], [`ZoneChange`], [`AccountChange`] - Change intents and
//!   account state transitions
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod change;
mod error;
mod ids;
mod record;

pub use change::{AccountChange, PendingAction, ZoneChange};
pub use error::SyncError;
pub use ids::{RecordId, SyncCursor, ZoneId};
pub use record::{Record, RemoteHandle, RemoteRecord};
