//! SyncCoordinator - drives record sync between the local cache and a remote
//! store.
//!
//! # Architecture
//!
//! The coordinator uses the pure state machine from sync-core for lifecycle
//! decisions and interprets the resulting actions against the
//! [`LocalCache`] and a [`RemoteSession`].
//!
//! ```text
//! QuoteStore → SyncCoordinator → RemoteSession → remote store
//!                    ↓
//!          sync-core (state machine, ledger, batches, reconcile)
//! ```
//!
//! Every operation, command or remote event, runs while holding one
//! `tokio::sync::Mutex`, so they execute one at a time in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use quotesync_client::{MemoryKv, MockCloud, SyncConfig, SyncCoordinator};
//!
//! let coordinator = SyncCoordinator::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryKv::new()),
//!     Arc::new(MockCloud::new()),
//! )
//! .await?;
//! coordinator.initialize().await?;
//! coordinator.push_local_changes().await?;
//! coordinator.pull_remote_changes().await?;
//! ```

use std::sync::Arc;

use quotesync_core::{
    apply_fetched, apply_saved, Action, BatchBuilder, ChangeLedger, CoordinatorState, CoreError,
    Enqueued, Event, Rejection, SyncOutcome,
};
use quotesync_types::{
    AccountChange, PendingAction, Record, RecordId, RemoteRecord, SyncError, ZoneChange, ZoneId,
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::cache::LocalCache;
use crate::kv::{KeyValueStore, StoreError};
use crate::remote::{
    FailedDelete, FailedSave, FailureKind, RemoteConnector, RemoteError, RemoteSession,
    SessionConfig, SessionEvent,
};
use crate::SyncConfig;

const OUTCOME_CAPACITY: usize = 64;

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// `initialize()` has not opened a session yet.
    #[error("not initialized")]
    NotInitialized,

    /// The account signed out or switched; waiting for a sign-in.
    #[error("sync is disabled until an account signs in")]
    Disabled,

    /// Another round trip is in progress.
    #[error("a sync round trip is already in progress")]
    Busy,

    /// Remote store error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Local storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] SyncError),

    /// Local data violates an invariant; stop rather than diverge.
    #[error("invariant violated: {0}")]
    Invariant(#[from] CoreError),
}

impl From<Rejection> for CoordinatorError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NotInitialized => Self::NotInitialized,
            Rejection::Disabled => Self::Disabled,
            Rejection::Busy => Self::Busy,
        }
    }
}

/// A pending record whose last send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFailure {
    /// The record.
    pub id: RecordId,
    /// Pending action.
    pub action: PendingAction,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Last error reported by the remote.
    pub error: String,
}

/// Snapshot of the coordinator's sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Lifecycle state.
    pub state: CoordinatorState,
    /// Whether a resume cursor is persisted.
    pub has_cursor: bool,
    /// Pending record changes.
    pub pending_records: usize,
    /// Pending zone changes.
    pub pending_zones: usize,
    /// Pending records whose last send failed.
    pub failures: Vec<PendingFailure>,
}

struct Inner {
    state: CoordinatorState,
    ledger: ChangeLedger,
    session: Option<Box<dyn RemoteSession>>,
    events: Option<UnboundedReceiver<SessionEvent>>,
    /// Whether this session has seen the zone exist remotely.
    zone_ready: bool,
}

/// Coordinates the pending-change ledger, the local cache and the remote
/// session.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Mutex<Inner>>,
    cache: LocalCache,
    connector: Arc<dyn RemoteConnector>,
    config: Arc<SyncConfig>,
    zone: ZoneId,
    outcomes: broadcast::Sender<SyncOutcome>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("zone", &self.zone)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Create a coordinator over `store`, loading any persisted ledger.
    ///
    /// No remote session is opened until [`initialize`](Self::initialize).
    pub async fn new(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Result<Self, CoordinatorError> {
        let zone = config.zone_id()?;
        let cache = LocalCache::new(store, &config);
        let ledger = cache.load_ledger(&zone).await;
        if !ledger.is_idle() {
            tracing::info!(
                "Loaded {} pending record changes and {} zone changes",
                ledger.len(),
                ledger.zone_len()
            );
        }
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CoordinatorState::new(),
                ledger,
                session: None,
                events: None,
                zone_ready: false,
            })),
            cache,
            connector,
            config: Arc::new(config),
            zone,
            outcomes,
        })
    }

    /// The local cache this coordinator reads and writes.
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribe to sync outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncOutcome> {
        self.outcomes.subscribe()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CoordinatorState {
        self.inner.lock().await.state
    }

    /// Snapshot of the sync state.
    pub async fn status(&self) -> SyncStatus {
        let inner = self.inner.lock().await;
        let failures = inner
            .ledger
            .entries()
            .filter_map(|(id, entry)| {
                entry.last_error.as_ref().map(|error| PendingFailure {
                    id: id.clone(),
                    action: entry.action,
                    attempts: entry.attempts,
                    error: error.clone(),
                })
            })
            .collect();

        SyncStatus {
            state: inner.state,
            has_cursor: self.cache.load_cursor().await.is_some(),
            pending_records: inner.ledger.len(),
            pending_zones: inner.ledger.zone_len(),
            failures,
        }
    }

    /// Open the remote session, resuming from the persisted cursor if any.
    ///
    /// Safe to call more than once; later calls find the session open and
    /// return immediately.
    pub async fn initialize(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_some() {
            tracing::debug!("Session already open");
            return Ok(());
        }

        let resume = self.cache.load_cursor().await;
        if resume.is_some() {
            tracing::info!("Opening remote session, resuming from saved cursor");
        } else {
            tracing::info!("Opening remote session for a full sync");
        }
        let opened = self
            .connector
            .open(SessionConfig {
                database: self.config.database.clone(),
                zone: self.zone.clone(),
                record_type: self.config.record_type.clone(),
                resume,
                batch_limit: self.config.batch_limit,
            })
            .await?;

        inner.session = Some(opened.session);
        inner.events = Some(opened.events);
        self.transition(&mut inner, Event::SessionOpened);

        self.drain_events(&mut inner).await
    }

    /// Send everything pending and wait for the remote's answer.
    ///
    /// Entries that fail stay pending for the next push.
    pub async fn push_local_changes(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        self.run_command(&mut inner, Event::PushRequested).await
    }

    /// Fetch and apply everything new on the remote.
    pub async fn pull_remote_changes(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        self.run_command(&mut inner, Event::PullRequested).await
    }

    /// Queue the zone and every local record for upload, then push.
    pub async fn reupload_everything(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        self.run_command(&mut inner, Event::ReuploadRequested).await
    }

    /// Wipe local data and delete every record and the zone remotely.
    pub async fn remove_all_data(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        self.run_command(&mut inner, Event::RemoveAllRequested).await
    }

    /// Remove everything, then reupload, as one operation.
    pub async fn reset_everything(&self) -> Result<(), CoordinatorError> {
        let mut inner = self.inner.lock().await;
        self.run_command(&mut inner, Event::RemoveAllRequested).await?;
        self.run_command(&mut inner, Event::ReuploadRequested).await
    }

    /// Record pending saves for records already written to the cache.
    pub async fn queue_saves(&self, ids: &[RecordId]) -> Result<(), CoordinatorError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if !inner.zone_ready && inner.ledger.zone_len() == 0 {
            tracing::debug!("Queueing zone {} ahead of the first save", self.zone);
            inner
                .ledger
                .enqueue_zone(ZoneChange::Save(self.zone.clone()));
        }
        for id in ids {
            let outcome = inner.ledger.enqueue(id.clone(), PendingAction::Save)?;
            tracing::debug!("Queued save for {}: {:?}", id, outcome);
        }
        self.cache.save_ledger(&inner.ledger).await?;
        Ok(())
    }

    /// Record pending deletions for records already removed from the cache.
    pub async fn queue_deletions(&self, records: &[Record]) -> Result<(), CoordinatorError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for record in records {
            queue_deletion(&mut inner.ledger, record)?;
        }
        self.cache.save_ledger(&inner.ledger).await?;
        Ok(())
    }

    /// Handle any unsolicited remote events that have arrived.
    ///
    /// Returns the number of events handled. Does nothing once
    /// [`spawn_event_loop`](Self::spawn_event_loop) has taken the channel.
    pub async fn process_pending_events(&self) -> Result<usize, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        let mut handled = 0;
        while let Some(event) = inner.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_unsolicited(&mut inner, event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle unsolicited remote events in a background task as they arrive.
    ///
    /// Returns `None` if there is no session yet or the loop already runs.
    pub async fn spawn_event_loop(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.inner.lock().await.events.take()?;
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut inner = coordinator.inner.lock().await;
                if let Err(e) = coordinator.handle_unsolicited(&mut inner, event).await {
                    tracing::error!("Failed to handle remote event: {}", e);
                }
            }
            tracing::debug!("Remote event channel closed");
        }))
    }

    async fn run_command(&self, inner: &mut Inner, event: Event) -> Result<(), CoordinatorError> {
        self.drain_events(inner).await?;

        let actions = self.transition(inner, event);
        let result = self.execute(inner, actions).await;
        self.finish_round_trip(inner).await;

        let saved = self.cache.save_ledger(&inner.ledger).await;
        result?;
        saved?;
        Ok(())
    }

    async fn execute(&self, inner: &mut Inner, actions: Vec<Action>) -> Result<(), CoordinatorError> {
        for action in actions {
            match action {
                Action::Reject(rejection) => {
                    tracing::debug!("Rejected {:?} in state {}", rejection, inner.state);
                    return Err(rejection.into());
                }
                Action::SendPendingChanges => self.send_pending(inner).await?,
                Action::FetchRemoteChanges => self.fetch_remote(inner).await?,
                other => self.perform(inner, other).await?,
            }
        }
        Ok(())
    }

    fn transition(&self, inner: &mut Inner, event: Event) -> Vec<Action> {
        let (next, actions) = inner.state.on_event(event);
        if next != inner.state {
            tracing::debug!("Coordinator {} -> {} on {:?}", inner.state, next, event);
        }
        inner.state = next;
        actions
    }

    async fn finish_round_trip(&self, inner: &mut Inner) {
        if !inner.state.is_busy() {
            return;
        }
        let actions = self.transition(inner, Event::RoundTripFinished);
        for action in actions {
            if let Err(e) = self.perform(inner, action).await {
                tracing::error!("Failed to finish round trip: {}", e);
            }
        }
    }

    async fn drain_events(&self, inner: &mut Inner) -> Result<(), CoordinatorError> {
        while let Some(event) = inner.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_unsolicited(inner, event).await?;
        }
        Ok(())
    }

    async fn handle_unsolicited(
        &self,
        inner: &mut Inner,
        event: SessionEvent,
    ) -> Result<(), CoordinatorError> {
        let result = self.handle_session_event(inner, event).await;
        self.finish_round_trip(inner).await;
        self.cache.save_ledger(&inner.ledger).await?;
        result
    }

    async fn send_pending(&self, inner: &mut Inner) -> Result<(), CoordinatorError> {
        if inner.ledger.is_idle() {
            tracing::debug!("Nothing pending, skipping send");
            return Ok(());
        }
        tracing::info!(
            "Sending {} pending record changes and {} zone changes",
            inner.ledger.len(),
            inner.ledger.zone_len()
        );

        let records = self.cache.load().await;
        let result = {
            let Inner {
                ledger, session, ..
            } = &mut *inner;
            let session = session.as_ref().ok_or(CoordinatorError::NotInitialized)?;
            let mut builder = BatchBuilder::new(ledger, &records);
            let result = session.send_changes(&mut builder).await;
            for id in builder.dropped() {
                tracing::info!("Dropped pending save for {}: record no longer exists locally", id);
            }
            result
        };

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Send failed, changes stay pending: {}", e);
                return Err(e.into());
            }
        };
        self.handle_all(inner, events).await
    }

    async fn fetch_remote(&self, inner: &mut Inner) -> Result<(), CoordinatorError> {
        let session = inner
            .session
            .as_ref()
            .ok_or(CoordinatorError::NotInitialized)?;
        let events = match session.fetch_changes().await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Fetch failed: {}", e);
                return Err(e.into());
            }
        };
        self.handle_all(inner, events).await
    }

    /// Handle every event of one round trip; the first error is returned
    /// after the rest have been handled.
    async fn handle_all(
        &self,
        inner: &mut Inner,
        events: Vec<SessionEvent>,
    ) -> Result<(), CoordinatorError> {
        let mut first_error = None;
        for event in events {
            if let Err(e) = self.handle_session_event(inner, event).await {
                tracing::error!("Failed to handle remote event: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn handle_session_event(
        &self,
        inner: &mut Inner,
        event: SessionEvent,
    ) -> Result<(), CoordinatorError> {
        let kind = event.kind();
        tracing::debug!("Handling session event: {}", kind);

        match event {
            SessionEvent::StateUpdate { cursor } => {
                self.cache.save_cursor(&cursor).await?;
                return Ok(());
            }

            SessionEvent::AccountChange(change) => {
                tracing::info!("Account change: {:?}", change);
                if change != AccountChange::SignIn {
                    inner.zone_ready = false;
                }
                let actions = self.transition(inner, Event::AccountChanged(change));
                for action in actions {
                    self.perform(inner, action).await?;
                }
            }

            SessionEvent::FetchedDatabaseChanges { deleted_zones } => {
                for zone in deleted_zones {
                    if zone != self.zone {
                        tracing::info!("Received deletion for unknown zone: {}", zone);
                        continue;
                    }
                    tracing::info!("Zone {} was deleted remotely, removing local data", zone);
                    inner.zone_ready = false;
                    let actions = self.transition(inner, Event::ZoneDeleted);
                    for action in actions {
                        self.perform(inner, action).await?;
                    }
                }
            }

            SessionEvent::FetchedRecordChanges {
                modifications,
                deletions,
            } => {
                let actions = self.transition(inner, Event::RemoteDeltaArrived);
                if !actions.contains(&Action::ApplyRemoteDelta) {
                    tracing::debug!(
                        "Ignoring {} fetched changes while {}",
                        modifications.len() + deletions.len(),
                        inner.state
                    );
                    return Ok(());
                }
                if !modifications.is_empty() {
                    inner.zone_ready = true;
                }
                self.apply_remote_delta(&modifications, &deletions).await?;
            }

            SessionEvent::SentRecordChanges {
                saved,
                deleted,
                failed_saves,
                failed_deletes,
            } => {
                self.apply_sent(inner, saved, deleted, failed_saves, failed_deletes)
                    .await?;
            }

            SessionEvent::SentDatabaseChanges {
                saved_zones,
                deleted_zones,
                failed_zones,
            } => {
                for zone in saved_zones {
                    if zone == self.zone {
                        inner.zone_ready = true;
                    }
                    inner.ledger.confirm_zone(&ZoneChange::Save(zone));
                }
                for zone in deleted_zones {
                    if zone == self.zone {
                        inner.zone_ready = false;
                    }
                    inner.ledger.confirm_zone(&ZoneChange::Delete(zone));
                }
                for (zone, message) in failed_zones {
                    tracing::warn!("Failed to change zone {}: {}", zone, message);
                }
            }

            SessionEvent::WillFetchChanges
            | SessionEvent::DidFetchChanges
            | SessionEvent::WillSendChanges
            | SessionEvent::DidSendChanges => {
                tracing::debug!("Purposely unhandled event: {}", kind);
                return Ok(());
            }
        }

        self.emit(SyncOutcome::ChangesFinished);
        Ok(())
    }

    async fn apply_remote_delta(
        &self,
        modifications: &[RemoteRecord],
        deletions: &[RecordId],
    ) -> Result<(), CoordinatorError> {
        let report = self
            .cache
            .update(|records| {
                apply_fetched(records, modifications, deletions).map_err(CoordinatorError::from)
            })
            .await
            .map_err(|e| {
                if let CoordinatorError::Invariant(inner) = &e {
                    tracing::error!("Local records are inconsistent, refusing remote delta: {}", inner);
                }
                e
            })?;

        for id in &report.edited {
            tracing::debug!("Received remote edit for {}", id);
        }
        for id in &report.added {
            tracing::debug!("Received new remote record {}", id);
        }
        for id in &report.deleted {
            tracing::debug!("Received remote deletion of {}", id);
        }
        for id in &report.missing_deletions {
            tracing::info!("Received deletion for unknown record {}", id);
        }
        if report.ignored > 0 {
            tracing::warn!("Ignored {} remote records without an id", report.ignored);
        }
        tracing::info!(
            "Applied remote changes: {} edited, {} added, {} deleted",
            report.edited.len(),
            report.added.len(),
            report.deleted.len()
        );
        Ok(())
    }

    async fn apply_sent(
        &self,
        inner: &mut Inner,
        saved: Vec<RemoteRecord>,
        deleted: Vec<RecordId>,
        failed_saves: Vec<FailedSave>,
        failed_deletes: Vec<FailedDelete>,
    ) -> Result<(), CoordinatorError> {
        for record in &saved {
            inner.ledger.confirm(&record.id, PendingAction::Save);
        }
        for id in &deleted {
            inner.ledger.confirm(id, PendingAction::Delete);
        }
        if !saved.is_empty() {
            inner.zone_ready = true;
            let updated = self
                .cache
                .update(|records| apply_saved(records, &saved).map_err(CoordinatorError::from))
                .await?;
            tracing::debug!("Stored remote handles for {} records", updated);
        }

        let mut zone_missing = false;
        for failure in failed_saves {
            tracing::warn!(
                "Failed to save record {}: {}",
                failure.record.id,
                failure.message
            );
            inner.ledger.fail(&failure.record.id, failure.message);
            zone_missing |= failure.kind == FailureKind::ZoneNotFound;
        }
        for failure in failed_deletes {
            tracing::warn!("Failed to delete record {}: {}", failure.id, failure.message);
            inner.ledger.fail(&failure.id, failure.message);
        }

        if zone_missing && inner.state.is_active() {
            tracing::info!("Zone {} is missing remotely, queueing it for creation", self.zone);
            inner.zone_ready = false;
            inner
                .ledger
                .enqueue_zone(ZoneChange::Save(self.zone.clone()));
        }
        tracing::info!(
            "Sent changes: {} saved, {} deleted, {} still pending",
            saved.len(),
            deleted.len(),
            inner.ledger.len()
        );
        Ok(())
    }

    async fn perform(&self, inner: &mut Inner, action: Action) -> Result<(), CoordinatorError> {
        match action {
            Action::QueueEverything => self.queue_everything(inner).await?,
            Action::QueueRemoteRemoval => self.queue_remote_removal(inner).await?,
            Action::WipeLocalData => self.cache.wipe().await?,
            Action::ClearPendingChanges => {
                // Both belong to the previous account
                tracing::info!("Clearing {} pending changes and the sync cursor", inner.ledger.len());
                inner.ledger.clear();
                self.cache.clear_cursor().await?;
            }
            Action::Emit(outcome) => self.emit(outcome),
            Action::Reject(rejection) => return Err(rejection.into()),
            other => tracing::debug!("Ignoring {:?} outside a command", other),
        }
        Ok(())
    }

    async fn queue_everything(&self, inner: &mut Inner) -> Result<(), CoordinatorError> {
        let records = self.cache.load().await;
        if records.is_empty() {
            tracing::info!("No local records to upload");
            return Ok(());
        }

        tracing::info!("Queueing zone {} and {} records for upload", self.zone, records.len());
        inner
            .ledger
            .enqueue_zone(ZoneChange::Save(self.zone.clone()));
        for record in records.iter() {
            inner.ledger.enqueue(record.id().clone(), PendingAction::Save)?;
        }
        Ok(())
    }

    async fn queue_remote_removal(&self, inner: &mut Inner) -> Result<(), CoordinatorError> {
        let records = self.cache.load().await;
        tracing::info!(
            "Queueing {} records and zone {} for remote deletion",
            records.len(),
            self.zone
        );
        for record in records.iter() {
            queue_deletion(&mut inner.ledger, record)?;
        }
        inner
            .ledger
            .enqueue_zone(ZoneChange::Delete(self.zone.clone()));
        Ok(())
    }

    fn emit(&self, outcome: SyncOutcome) {
        // No subscribers is fine
        let _ = self.outcomes.send(outcome);
    }
}

/// Queue a delete, keeping it when it cancelled a save of a record the
/// remote already holds.
fn queue_deletion(ledger: &mut ChangeLedger, record: &Record) -> Result<(), CoreError> {
    let id = record.id().clone();
    match ledger.enqueue(id.clone(), PendingAction::Delete)? {
        Enqueued::Cancelled if record.is_known_remotely() => {
            ledger.enqueue(id.clone(), PendingAction::Delete)?;
            tracing::debug!("Queued delete for {} after cancelling its pending save", id);
        }
        Enqueued::Cancelled => {
            tracing::debug!("Cancelled unsent save for {}", id);
        }
        outcome => tracing::debug!("Queued delete for {}: {:?}", id, outcome),
    }
    Ok(())
}
