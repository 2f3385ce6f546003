//! The UI-facing quote store.
//!
//! Holds the list the interface shows, writes edits through the local cache
//! and tells the coordinator what to upload. The list is refetched from the
//! cache whenever the coordinator reports an outcome.

use std::sync::Arc;

use quotesync_core::SyncOutcome;
use quotesync_types::{Record, RecordId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::coordinator::{CoordinatorError, SyncCoordinator};

/// The current quote list plus the edit operations.
///
/// Clones share the same list.
#[derive(Debug, Clone)]
pub struct QuoteStore {
    coordinator: SyncCoordinator,
    quotes: Arc<RwLock<Vec<Record>>>,
}

impl QuoteStore {
    /// Create a store over `coordinator`, loading the cached quotes.
    pub async fn open(coordinator: SyncCoordinator) -> Self {
        let quotes = coordinator.cache().load().await.into_vec();
        Self {
            coordinator,
            quotes: Arc::new(RwLock::new(quotes)),
        }
    }

    /// The coordinator edits are queued with.
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// The current quotes, in insertion order.
    pub async fn quotes(&self) -> Vec<Record> {
        self.quotes.read().await.clone()
    }

    /// Look up a quote by id.
    pub async fn get(&self, id: &RecordId) -> Option<Record> {
        self.quotes.read().await.iter().find(|r| r.id() == id).cloned()
    }

    /// Save a quote: a placeholder gets a fresh id and is appended, anything
    /// else replaces the text of the quote with the same id.
    ///
    /// The cached remote handle of an existing quote is kept, whatever the
    /// caller's copy carries. Returns the record as stored.
    pub async fn save(&self, record: Record) -> Result<Record, CoordinatorError> {
        let record = record.assign_id();
        let record = self
            .coordinator
            .cache()
            .update(|records| {
                let stored = match records.get(record.id()) {
                    Some(current) => current.with_text(record.text()),
                    None => record,
                };
                records
                    .upsert(stored.clone())
                    .map_err(CoordinatorError::from)?;
                Ok::<_, CoordinatorError>(stored)
            })
            .await?;
        self.coordinator.queue_saves(&[record.id().clone()]).await?;
        tracing::debug!("Saved quote {}", record.id());

        self.refresh().await;
        Ok(record)
    }

    /// Replace the text of an existing quote.
    ///
    /// Returns `None` if no quote has that id.
    pub async fn edit(&self, id: &RecordId, text: &str) -> Result<Option<Record>, CoordinatorError> {
        match self.get(id).await {
            Some(current) => self.save(current.with_text(text)).await.map(Some),
            None => Ok(None),
        }
    }

    /// Remove a quote and queue its remote deletion.
    ///
    /// Returns `false` if it was not stored.
    pub async fn remove(&self, record: &Record) -> Result<bool, CoordinatorError> {
        let id = record.id().clone();
        let removed = self
            .coordinator
            .cache()
            .update(|records| Ok::<_, CoordinatorError>(records.remove(&id)))
            .await?;

        let Some(removed) = removed else {
            tracing::debug!("Quote {} was not stored, nothing to remove", id);
            return Ok(false);
        };
        self.coordinator.queue_deletions(&[removed]).await?;

        self.refresh().await;
        Ok(true)
    }

    /// Refetch the list from the cache.
    pub async fn refresh(&self) {
        let records = self.coordinator.cache().load().await.into_vec();
        *self.quotes.write().await = records;
    }

    /// Keep the list current by refetching on every coordinator outcome.
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        let mut outcomes = self.coordinator.subscribe();
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match outcomes.recv().await {
                    Ok(SyncOutcome::ChangesFinished) => store.refresh().await,
                    Ok(SyncOutcome::LocalDataRemoved) => store.quotes.write().await.clear(),
                    Ok(SyncOutcome::Disabled) => {
                        tracing::info!("Sync disabled, showing local data only");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Missed {} sync outcomes, refreshing", skipped);
                        store.refresh().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::remote::MockCloud;
    use crate::SyncConfig;
    use quotesync_types::ZoneId;
    use std::time::Duration;

    async fn store(cloud: &MockCloud) -> QuoteStore {
        let coordinator = SyncCoordinator::new(
            SyncConfig::default(),
            Arc::new(MemoryKv::new()),
            Arc::new(cloud.clone()),
        )
        .await
        .unwrap();
        coordinator.initialize().await.unwrap();
        QuoteStore::open(coordinator).await
    }

    #[tokio::test]
    async fn save_placeholder_appends_with_fresh_id() {
        let store = store(&MockCloud::new()).await;

        let first = store.save(Record::placeholder().with_text("one")).await.unwrap();
        let second = store.save(Record::placeholder().with_text("two")).await.unwrap();

        assert!(!first.id().is_placeholder());
        assert_ne!(first.id(), second.id());
        let texts: Vec<String> = store.quotes().await.iter().map(|r| r.text().to_string()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(store.coordinator().status().await.pending_records, 2);
    }

    #[tokio::test]
    async fn edit_replaces_in_place() {
        let store = store(&MockCloud::new()).await;
        let first = store.save(Record::new("one")).await.unwrap();
        store.save(Record::new("two")).await.unwrap();

        let edited = store.edit(first.id(), "uno").await.unwrap().unwrap();

        assert_eq!(edited.id(), first.id());
        let quotes = store.quotes().await;
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].text(), "uno");
        assert!(store.edit(&RecordId::new("missing"), "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_unsent_quote_leaves_nothing_pending() {
        let store = store(&MockCloud::new()).await;
        let quote = store.save(Record::new("short-lived")).await.unwrap();

        assert!(store.remove(&quote).await.unwrap());
        assert!(!store.remove(&quote).await.unwrap());

        assert!(store.quotes().await.is_empty());
        assert_eq!(store.coordinator().status().await.pending_records, 0);
    }

    #[tokio::test]
    async fn edit_after_push_keeps_remote_handle() {
        let cloud = MockCloud::new();
        let store = store(&cloud).await;
        let quote = store.save(Record::new("hello")).await.unwrap();
        store.coordinator().push_local_changes().await.unwrap();

        // The list still holds the copy from before the push
        assert!(!store.get(quote.id()).await.unwrap().is_known_remotely());
        let edited = store.edit(quote.id(), "hello again").await.unwrap().unwrap();
        assert!(edited.is_known_remotely());
        let cached = store.coordinator().cache().load().await;
        assert!(cached.get(quote.id()).unwrap().is_known_remotely());

        assert!(store.remove(&edited).await.unwrap());
        assert_eq!(store.coordinator().status().await.pending_records, 1);
        store.coordinator().push_local_changes().await.unwrap();

        assert!(cloud.records("Quotes").is_empty());
        assert_eq!(store.coordinator().status().await.pending_records, 0);
    }

    #[tokio::test]
    async fn refresh_loop_picks_up_remote_changes() {
        let cloud = MockCloud::new();
        let store = store(&cloud).await;
        let handle = store.spawn_refresh_loop();

        cloud
            .save_from_other_device(&ZoneId::new("Quotes").unwrap(), &RecordId::new("R"), "remote")
            .unwrap();
        store.coordinator().pull_remote_changes().await.unwrap();

        let quotes = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let quotes = store.quotes().await;
                if !quotes.is_empty() {
                    return quotes;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(quotes[0].text(), "remote");
        handle.abort();
    }
}
