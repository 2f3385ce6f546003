//! # sync-core
//!
//! Pure logic for quotesync.
//!
//! - [`RecordSet`]: the cached records, one slot per id, in insertion order
//! - [`ChangeLedger`]: pending saves and deletes, collapsed per id
//! - [`BatchBuilder`]: turns the ledger into outbound batches on request
//! - [`apply_fetched`] / [`apply_saved`]: fold remote results into the records
//! - [`CoordinatorState`]: lifecycle state machine returning [`Action`]s
//!
//! Nothing here touches a disk, a clock or a remote store. `sync-client`
//! loads the inputs, calls these functions and carries out the actions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod records;
pub mod state;

pub use batch::{BatchBuilder, BatchRequest, ChangeBatch, SendScope};
pub use error::CoreError;
pub use ledger::{ChangeLedger, Enqueued, PendingChange, PendingEntry};
pub use reconcile::{apply_fetched, apply_saved, ApplyReport};
pub use records::RecordSet;
pub use state::{Action, CoordinatorState, Event, Rejection, SyncOutcome};
