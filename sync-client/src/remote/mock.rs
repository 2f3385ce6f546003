//! In-memory remote store for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use quotesync_core::ChangeBatch;
use quotesync_types::{AccountChange, RecordId, RemoteRecord, SyncCursor, ZoneId};
use tokio::sync::mpsc::{self, UnboundedSender};

use super::cloud::{CloudState, InjectedFailure, ResumeState, SessionContext};
use super::{
    BatchSource, FailureKind, OpenedSession, RemoteConnector, RemoteError, RemoteSession,
    SessionConfig, SessionEvent,
};
use crate::config::DEFAULT_RECORD_TYPE;

const OTHER_DEVICE: &str = "other-device";

/// One completed fetch, as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    /// Account fetched from.
    pub account: String,
    /// Log position the fetch started after.
    pub from: u64,
    /// Log position the fetch ended at.
    pub to: u64,
    /// Record modifications plus deletions delivered.
    pub delivered: usize,
}

/// In-memory remote store for testing.
///
/// Clones share the same state, so several connectors (one per simulated
/// device) can talk to one cloud. Starts signed in as `"user"`.
#[derive(Debug, Clone)]
pub struct MockCloud {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    account: Option<String>,
    stores: HashMap<String, CloudState>,
    listeners: Vec<UnboundedSender<SessionEvent>>,
    opened: Vec<Option<SyncCursor>>,
    fetches: Vec<FetchRecord>,
    send_calls: usize,
    fetch_calls: usize,
    fail_next_open: Option<String>,
    fail_next_send: Option<String>,
    fail_next_fetch: Option<String>,
    injected: VecDeque<InjectedFailure>,
}

impl Inner {
    fn broadcast(&mut self, change: AccountChange) {
        let event = SessionEvent::AccountChange(change);
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn current_store(&mut self) -> Result<&mut CloudState, RemoteError> {
        let account = self.account.clone().ok_or(RemoteError::NotSignedIn)?;
        Ok(self.stores.entry(account).or_default())
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    /// Create an empty cloud signed in as `"user"`.
    pub fn new() -> Self {
        let cloud = Self::signed_out();
        cloud.lock().account = Some("user".to_string());
        cloud
    }

    /// Create an empty cloud with no account.
    pub fn signed_out() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Sign in `account` and notify open sessions.
    pub fn sign_in(&self, account: &str) {
        let mut inner = self.lock();
        inner.account = Some(account.to_string());
        inner.broadcast(AccountChange::SignIn);
    }

    /// Sign out and notify open sessions.
    pub fn sign_out(&self) {
        let mut inner = self.lock();
        inner.account = None;
        inner.broadcast(AccountChange::SignOut);
    }

    /// Switch to `account` and notify open sessions.
    pub fn switch_account(&self, account: &str) {
        let mut inner = self.lock();
        inner.account = Some(account.to_string());
        inner.broadcast(AccountChange::SwitchAccounts);
    }

    /// Delete a zone as another device would.
    pub fn delete_zone(&self, zone: &ZoneId) -> Result<(), RemoteError> {
        self.apply_from_other_device(
            zone,
            ChangeBatch {
                zones_to_delete: vec![zone.clone()],
                ..ChangeBatch::default()
            },
        )
    }

    /// Save a record as another device would, creating the zone if needed.
    pub fn save_from_other_device(
        &self,
        zone: &ZoneId,
        id: &RecordId,
        text: &str,
    ) -> Result<(), RemoteError> {
        self.apply_from_other_device(
            zone,
            ChangeBatch {
                zones_to_save: vec![zone.clone()],
                records_to_save: vec![RemoteRecord {
                    id: id.clone(),
                    text: Some(text.to_string()),
                    handle: None,
                }],
                ..ChangeBatch::default()
            },
        )
    }

    /// Delete a record as another device would.
    pub fn delete_from_other_device(&self, zone: &ZoneId, id: &RecordId) -> Result<(), RemoteError> {
        self.apply_from_other_device(
            zone,
            ChangeBatch {
                records_to_delete: vec![id.clone()],
                ..ChangeBatch::default()
            },
        )
    }

    /// Records currently stored in `zone` for the signed-in account.
    pub fn records(&self, zone: &str) -> Vec<RemoteRecord> {
        let inner = self.lock();
        inner
            .account
            .as_ref()
            .and_then(|account| inner.stores.get(account))
            .map(|store| store.records(zone))
            .unwrap_or_default()
    }

    /// Whether `zone` exists for the signed-in account.
    pub fn has_zone(&self, zone: &str) -> bool {
        let inner = self.lock();
        inner
            .account
            .as_ref()
            .and_then(|account| inner.stores.get(account))
            .is_some_and(|store| store.has_zone(zone))
    }

    /// Resume cursors passed to every `open` call, in order.
    pub fn opened_cursors(&self) -> Vec<Option<SyncCursor>> {
        self.lock().opened.clone()
    }

    /// Every completed fetch, in order.
    pub fn fetches(&self) -> Vec<FetchRecord> {
        self.lock().fetches.clone()
    }

    /// Number of `send_changes` calls.
    pub fn send_calls(&self) -> usize {
        self.lock().send_calls
    }

    /// Number of `fetch_changes` calls.
    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Number of sends plus fetches.
    pub fn remote_calls(&self) -> usize {
        let inner = self.lock();
        inner.send_calls + inner.fetch_calls
    }

    /// Make the next `open` fail with a network error.
    pub fn fail_next_open(&self, message: &str) {
        self.lock().fail_next_open = Some(message.to_string());
    }

    /// Make the next `send_changes` fail with a network error.
    pub fn fail_next_send(&self, message: &str) {
        self.lock().fail_next_send = Some(message.to_string());
    }

    /// Make the next `fetch_changes` fail with a network error.
    pub fn fail_next_fetch(&self, message: &str) {
        self.lock().fail_next_fetch = Some(message.to_string());
    }

    /// Reject the next record save with `kind`.
    pub fn fail_next_save(&self, kind: FailureKind, message: &str) {
        self.lock().injected.push_back(InjectedFailure {
            kind,
            message: message.to_string(),
        });
    }

    fn apply_from_other_device(&self, zone: &ZoneId, batch: ChangeBatch) -> Result<(), RemoteError> {
        let ctx = SessionContext {
            device: OTHER_DEVICE.to_string(),
            zone: zone.clone(),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            batch_limit: usize::MAX,
        };
        let mut inner = self.lock();
        let store = inner.current_store()?;
        store.apply_batch(&ctx, batch, &mut VecDeque::new());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteConnector for MockCloud {
    async fn open(&self, config: SessionConfig) -> Result<OpenedSession, RemoteError> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_open.take() {
            return Err(RemoteError::Network(message));
        }
        inner.opened.push(config.resume.clone());

        let resume = ResumeState::from_cursor(config.resume.as_ref());
        let (tx, rx) = mpsc::unbounded_channel();

        let position = match (&inner.account, &resume) {
            (Some(_), None) => {
                let _ = tx.send(SessionEvent::AccountChange(AccountChange::SignIn));
                0
            }
            (Some(current), Some(state)) if state.account != *current => {
                let _ = tx.send(SessionEvent::AccountChange(AccountChange::SwitchAccounts));
                0
            }
            (Some(_), Some(state)) => state.position,
            (None, Some(_)) => {
                let _ = tx.send(SessionEvent::AccountChange(AccountChange::SignOut));
                0
            }
            (None, None) => 0,
        };

        let device = resume
            .as_ref()
            .map(|state| state.device.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::debug!("Mock cloud opened session for device {} at {}", device, position);

        let session = MockSession {
            cloud: self.clone(),
            ctx: SessionContext {
                device,
                zone: config.zone,
                record_type: config.record_type,
                batch_limit: config.batch_limit,
            },
            position: Mutex::new(SessionPosition {
                account: inner.account.clone(),
                position,
            }),
        };
        inner.listeners.push(tx);

        Ok(OpenedSession {
            session: Box::new(session),
            events: rx,
        })
    }
}

#[derive(Debug)]
struct SessionPosition {
    account: Option<String>,
    position: u64,
}

struct MockSession {
    cloud: MockCloud,
    ctx: SessionContext,
    position: Mutex<SessionPosition>,
}

impl MockSession {
    /// Current account and position, reset when the account has changed.
    fn sync_position(&self, account: &str) -> u64 {
        let mut pos = self.position.lock().unwrap_or_else(PoisonError::into_inner);
        if pos.account.as_deref() != Some(account) {
            pos.account = Some(account.to_string());
            pos.position = 0;
        }
        pos.position
    }

    fn set_position(&self, position: u64) {
        self.position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position = position;
    }

    fn cursor(&self, account: &str, position: u64) -> Result<SyncCursor, RemoteError> {
        ResumeState {
            account: account.to_string(),
            device: self.ctx.device.clone(),
            position,
        }
        .to_cursor()
    }

    fn send_now(&self, source: &mut (dyn BatchSource + Send)) -> Result<Vec<SessionEvent>, RemoteError> {
        let mut inner = self.cloud.lock();
        inner.send_calls += 1;
        if let Some(message) = inner.fail_next_send.take() {
            return Err(RemoteError::Network(message));
        }
        let account = inner.account.clone().ok_or(RemoteError::NotSignedIn)?;
        let position = self.sync_position(&account);

        let Inner {
            stores, injected, ..
        } = &mut *inner;
        let store = stores.entry(account.clone()).or_default();

        let mut events = vec![SessionEvent::WillSendChanges];
        events.extend(store.send(&self.ctx, source, injected));
        events.push(SessionEvent::StateUpdate {
            cursor: self.cursor(&account, position)?,
        });
        events.push(SessionEvent::DidSendChanges);
        Ok(events)
    }

    fn fetch_now(&self) -> Result<Vec<SessionEvent>, RemoteError> {
        let mut inner = self.cloud.lock();
        inner.fetch_calls += 1;
        if let Some(message) = inner.fail_next_fetch.take() {
            return Err(RemoteError::Network(message));
        }
        let account = inner.account.clone().ok_or(RemoteError::NotSignedIn)?;
        let from = self.sync_position(&account);

        let store = inner.stores.entry(account.clone()).or_default();
        let (changes, to) = store.changes_since(&self.ctx, from);
        let delivered = changes
            .iter()
            .map(|event| match event {
                SessionEvent::FetchedRecordChanges {
                    modifications,
                    deletions,
                } => modifications.len() + deletions.len(),
                _ => 0,
            })
            .sum();
        inner.fetches.push(FetchRecord {
            account: account.clone(),
            from,
            to,
            delivered,
        });
        self.set_position(to);

        let mut events = vec![SessionEvent::WillFetchChanges];
        events.extend(changes);
        events.push(SessionEvent::StateUpdate {
            cursor: self.cursor(&account, to)?,
        });
        events.push(SessionEvent::DidFetchChanges);
        Ok(events)
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn send_changes(
        &self,
        source: &mut (dyn BatchSource + Send),
    ) -> Result<Vec<SessionEvent>, RemoteError> {
        self.send_now(source)
    }

    async fn fetch_changes(&self) -> Result<Vec<SessionEvent>, RemoteError> {
        self.fetch_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotesync_core::{BatchBuilder, ChangeLedger, RecordSet};
    use quotesync_types::{PendingAction, Record, ZoneChange};

    fn quotes() -> ZoneId {
        ZoneId::new("Quotes").unwrap()
    }

    fn config(resume: Option<SyncCursor>) -> SessionConfig {
        SessionConfig {
            database: "private".into(),
            zone: quotes(),
            record_type: "Quote".into(),
            resume,
            batch_limit: 400,
        }
    }

    async fn send(session: &dyn RemoteSession, records: &RecordSet) -> Vec<SessionEvent> {
        let mut ledger = ChangeLedger::new(quotes());
        ledger.enqueue_zone(ZoneChange::Save(quotes()));
        for record in records.iter() {
            ledger.enqueue(record.id().clone(), PendingAction::Save).unwrap();
        }
        let mut builder = BatchBuilder::new(&mut ledger, records);
        session.send_changes(&mut builder).await.unwrap()
    }

    fn last_cursor(events: &[SessionEvent]) -> Option<SyncCursor> {
        events.iter().rev().find_map(|event| match event {
            SessionEvent::StateUpdate { cursor } => Some(cursor.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn fresh_open_reports_sign_in() {
        let cloud = MockCloud::new();
        let mut opened = cloud.open(config(None)).await.unwrap();

        assert_eq!(
            opened.events.try_recv().unwrap(),
            SessionEvent::AccountChange(AccountChange::SignIn)
        );
        assert_eq!(cloud.opened_cursors(), vec![None]);
    }

    #[tokio::test]
    async fn send_then_fetch_from_other_session() {
        let cloud = MockCloud::new();
        let a = cloud.open(config(None)).await.unwrap();
        let b = cloud.open(config(None)).await.unwrap();

        let records = RecordSet::from_records(vec![Record::with_id(RecordId::new("A"), "hello")]);
        let events = send(a.session.as_ref(), &records).await;
        assert_eq!(events.first(), Some(&SessionEvent::WillSendChanges));
        assert_eq!(events.last(), Some(&SessionEvent::DidSendChanges));
        assert_eq!(cloud.records("Quotes").len(), 1);

        let fetched = b.session.fetch_changes().await.unwrap();
        assert!(fetched.iter().any(|event| matches!(
            event,
            SessionEvent::FetchedRecordChanges { modifications, .. } if modifications.len() == 1
        )));
        assert_eq!(cloud.fetches()[0].delivered, 1);
        assert_eq!(cloud.remote_calls(), 2);
    }

    #[tokio::test]
    async fn resume_cursor_skips_seen_changes() {
        let cloud = MockCloud::new();
        cloud
            .save_from_other_device(&quotes(), &RecordId::new("A"), "hello")
            .unwrap();

        let first = cloud.open(config(None)).await.unwrap();
        let events = first.session.fetch_changes().await.unwrap();
        let cursor = last_cursor(&events);

        let resumed = cloud.open(config(cursor)).await.unwrap();
        resumed.session.fetch_changes().await.unwrap();

        let fetches = cloud.fetches();
        assert_eq!(fetches[0].delivered, 1);
        assert_eq!(fetches[1].from, fetches[0].to);
        assert_eq!(fetches[1].delivered, 0);
    }

    #[tokio::test]
    async fn resume_from_other_account_reports_switch() {
        let cloud = MockCloud::new();
        let first = cloud.open(config(None)).await.unwrap();
        let events = first.session.fetch_changes().await.unwrap();
        let cursor = last_cursor(&events);

        cloud.switch_account("someone-else");
        let mut resumed = cloud.open(config(cursor)).await.unwrap();

        assert_eq!(
            resumed.events.try_recv().unwrap(),
            SessionEvent::AccountChange(AccountChange::SwitchAccounts)
        );
    }

    #[tokio::test]
    async fn account_changes_reach_open_sessions() {
        let cloud = MockCloud::new();
        let mut opened = cloud.open(config(None)).await.unwrap();
        let _ = opened.events.try_recv();

        cloud.sign_out();

        assert_eq!(
            opened.events.try_recv().unwrap(),
            SessionEvent::AccountChange(AccountChange::SignOut)
        );
        let result = opened.session.fetch_changes().await;
        assert!(matches!(result, Err(RemoteError::NotSignedIn)));
    }

    #[tokio::test]
    async fn injected_send_failure() {
        let cloud = MockCloud::new();
        let opened = cloud.open(config(None)).await.unwrap();
        cloud.fail_next_send("offline");

        let records = RecordSet::new();
        let mut ledger = ChangeLedger::new(quotes());
        let mut builder = BatchBuilder::new(&mut ledger, &records);
        let result = opened.session.send_changes(&mut builder).await;

        assert!(matches!(result, Err(RemoteError::Network(m)) if m == "offline"));
        assert_eq!(cloud.send_calls(), 1);
    }

    #[tokio::test]
    async fn zone_deletion_from_other_device() {
        let cloud = MockCloud::new();
        cloud
            .save_from_other_device(&quotes(), &RecordId::new("A"), "x")
            .unwrap();
        assert!(cloud.has_zone("Quotes"));

        cloud.delete_zone(&quotes()).unwrap();

        assert!(!cloud.has_zone("Quotes"));
        let opened = cloud.open(config(None)).await.unwrap();
        let events = opened.session.fetch_changes().await.unwrap();
        assert!(events.contains(&SessionEvent::FetchedDatabaseChanges {
            deleted_zones: vec![quotes()],
        }));
    }
}
