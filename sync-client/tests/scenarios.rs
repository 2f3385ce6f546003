//! End-to-end sync scenarios against the in-memory cloud.

use std::collections::HashSet;
use std::sync::Arc;

use quotesync_client::{
    CoordinatorState, FileKv, LocalCache, MemoryKv, MockCloud, QuoteStore, Record, RecordId,
    SyncConfig, SyncCoordinator, SyncOutcome, ZoneId,
};
use quotesync_core::{BatchBuilder, BatchRequest, ChangeLedger, Enqueued, RecordSet};
use quotesync_types::PendingAction;
use tempfile::tempdir;

async fn device(cloud: &MockCloud, kv: &MemoryKv) -> SyncCoordinator {
    let coordinator = SyncCoordinator::new(
        SyncConfig::default(),
        Arc::new(kv.clone()),
        Arc::new(cloud.clone()),
    )
    .await
    .unwrap();
    coordinator.initialize().await.unwrap();
    coordinator
}

fn quotes_zone() -> ZoneId {
    ZoneId::new("Quotes").unwrap()
}

fn id(value: &str) -> RecordId {
    RecordId::new(value)
}

fn assert_unique_ids(records: &RecordSet) {
    let ids: HashSet<RecordId> = records.iter().map(|r| r.id().clone()).collect();
    assert_eq!(ids.len(), records.len(), "duplicate ids in {:?}", records);
}

#[tokio::test]
async fn interleaved_edits_keep_one_record_per_id() {
    let cloud = MockCloud::new();
    let sync = device(&cloud, &MemoryKv::new()).await;
    let store = QuoteStore::open(sync.clone()).await;

    let a = store
        .save(Record::with_id(id("A"), "local"))
        .await
        .unwrap();
    sync.push_local_changes().await.unwrap();

    // Remote edit wins when it arrives after the local save
    cloud
        .save_from_other_device(&quotes_zone(), a.id(), "remote")
        .unwrap();
    cloud
        .save_from_other_device(&quotes_zone(), &id("B"), "from elsewhere")
        .unwrap();
    sync.pull_remote_changes().await.unwrap();

    let records = sync.cache().load().await;
    assert_unique_ids(&records);
    assert_eq!(records.get(&id("A")).unwrap().text(), "remote");
    assert_eq!(records.get(&id("B")).unwrap().text(), "from elsewhere");

    // Local edit after the pull wins and is what the cloud ends up with
    store.refresh().await;
    store.edit(&id("A"), "local again").await.unwrap();
    cloud.delete_from_other_device(&quotes_zone(), &id("B")).unwrap();
    sync.pull_remote_changes().await.unwrap();
    sync.push_local_changes().await.unwrap();

    let records = sync.cache().load().await;
    assert_unique_ids(&records);
    assert_eq!(records.len(), 1);
    assert_eq!(records.get(&id("A")).unwrap().text(), "local again");
    let remote = cloud.records("Quotes");
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].text.as_deref(), Some("local again"));
}

#[tokio::test]
async fn save_then_delete_before_send_leaves_nothing_pending() {
    let mut ledger = ChangeLedger::new(quotes_zone());
    ledger.enqueue(id("A"), PendingAction::Save).unwrap();
    assert_eq!(
        ledger.enqueue(id("A"), PendingAction::Delete).unwrap(),
        Enqueued::Cancelled
    );
    assert!(ledger.get(&id("A")).is_none());

    let cloud = MockCloud::new();
    let sync = device(&cloud, &MemoryKv::new()).await;
    let store = QuoteStore::open(sync.clone()).await;
    let record = store.save(Record::new("never sent")).await.unwrap();
    store.remove(&record).await.unwrap();

    assert_eq!(sync.status().await.pending_records, 0);
    sync.push_local_changes().await.unwrap();
    assert!(cloud.records("Quotes").is_empty());
}

#[tokio::test]
async fn resumed_session_does_not_refetch_delivered_changes() {
    let cloud = MockCloud::new();
    let kv = MemoryKv::new();
    cloud
        .save_from_other_device(&quotes_zone(), &id("A"), "hello")
        .unwrap();

    {
        let sync = device(&cloud, &kv).await;
        sync.pull_remote_changes().await.unwrap();
        assert_eq!(sync.cache().load().await.len(), 1);
    }
    let first = cloud.fetches()[0].clone();
    assert_eq!(first.delivered, 1);

    // Restart on the same local store
    let sync = device(&cloud, &kv).await;
    let saved = sync.cache().load_cursor().await;
    assert!(saved.is_some());
    assert_eq!(cloud.opened_cursors().last().cloned().flatten(), saved);

    sync.pull_remote_changes().await.unwrap();
    let second = cloud.fetches()[1].clone();
    assert_eq!(second.from, first.to);
    assert_eq!(second.delivered, 0);
    assert_eq!(sync.cache().load().await.len(), 1);
}

#[tokio::test]
async fn snapshot_survives_reopen_and_torn_write() {
    let dir = tempdir().unwrap();
    let config = SyncConfig::default();
    let records = RecordSet::from_records(vec![
        Record::with_id(id("A"), "hello"),
        Record::with_id(id("B"), "world"),
    ]);

    let cache = LocalCache::new(Arc::new(FileKv::open(dir.path()).await.unwrap()), &config);
    cache.replace(&records).await.unwrap();

    // A write interrupted before its rename leaves only the temporary file
    std::fs::write(dir.path().join(".AllQuotes.tmp"), b"{\"trunc").unwrap();

    let reopened = LocalCache::new(Arc::new(FileKv::open(dir.path()).await.unwrap()), &config);
    let loaded = reopened.load().await;
    assert_eq!(loaded.ids(), records.ids());
    let texts: Vec<&str> = loaded.iter().map(|r| r.text()).collect();
    assert_eq!(texts, vec!["hello", "world"]);
}

#[tokio::test]
async fn reupload_of_empty_cache_does_nothing() {
    let cloud = MockCloud::new();
    let sync = device(&cloud, &MemoryKv::new()).await;

    sync.reupload_everything().await.unwrap();

    let status = sync.status().await;
    assert_eq!(status.pending_records, 0);
    assert_eq!(status.pending_zones, 0);
    assert_eq!(cloud.remote_calls(), 0);
}

#[tokio::test]
async fn full_scope_batch_carries_only_pending_records() {
    let records = RecordSet::from_records(vec![
        Record::with_id(id("A"), "hello"),
        Record::with_id(id("B"), "world"),
    ]);
    let mut ledger = ChangeLedger::new(quotes_zone());
    ledger.enqueue(id("A"), PendingAction::Save).unwrap();

    let batch = {
        let mut builder = BatchBuilder::new(&mut ledger, &records);
        let batch = builder.next_batch(&BatchRequest::all(400)).unwrap();
        assert!(builder.next_batch(&BatchRequest::all(400)).is_none());
        batch
    };

    assert_eq!(batch.records_to_save.len(), 1);
    assert_eq!(batch.records_to_save[0].id, id("A"));
    assert_eq!(batch.records_to_save[0].text.as_deref(), Some("hello"));
    assert!(batch.records_to_delete.is_empty());

    assert!(ledger.confirm(&id("A"), PendingAction::Save));
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn remote_zone_deletion_wipes_local_cache() {
    let cloud = MockCloud::new();
    let kv = MemoryKv::new();
    let sync = device(&cloud, &kv).await;
    let store = QuoteStore::open(sync.clone()).await;
    store.save(Record::new("hello")).await.unwrap();
    store.save(Record::new("world")).await.unwrap();
    sync.push_local_changes().await.unwrap();
    assert!(kv.contains_key("AllQuotes"));

    let mut outcomes = sync.subscribe();
    cloud.delete_zone(&quotes_zone()).unwrap();
    sync.pull_remote_changes().await.unwrap();

    assert!(sync.cache().load().await.is_empty());
    assert!(!kv.contains_key("AllQuotes"));
    let mut seen = Vec::new();
    while let Ok(outcome) = outcomes.try_recv() {
        seen.push(outcome);
    }
    assert!(seen.contains(&SyncOutcome::LocalDataRemoved));
}

#[tokio::test]
async fn account_switch_with_pending_saves_disables_sync() {
    let cloud = MockCloud::new();
    let kv = MemoryKv::new();
    let sync = device(&cloud, &kv).await;
    let store = QuoteStore::open(sync.clone()).await;
    for text in ["one", "two", "three"] {
        store.save(Record::new(text)).await.unwrap();
    }
    assert_eq!(sync.status().await.pending_records, 3);

    let mut outcomes = sync.subscribe();
    cloud.switch_account("someone-else");
    sync.process_pending_events().await.unwrap();

    let status = sync.status().await;
    assert_eq!(status.state, CoordinatorState::Disabled);
    assert_eq!(status.pending_records, 0);
    assert_eq!(status.pending_zones, 0);
    assert!(!status.has_cursor);
    assert!(sync.cache().load().await.is_empty());
    assert!(!kv.contains_key("AllQuotes"));

    let mut seen = Vec::new();
    while let Ok(outcome) = outcomes.try_recv() {
        seen.push(outcome);
    }
    assert!(seen.contains(&SyncOutcome::Disabled));
    assert_eq!(cloud.send_calls(), 0);
}

#[tokio::test]
async fn two_devices_converge_through_one_cloud() {
    let cloud = MockCloud::new();
    let laptop = device(&cloud, &MemoryKv::new()).await;
    let phone = device(&cloud, &MemoryKv::new()).await;
    let laptop_store = QuoteStore::open(laptop.clone()).await;
    let phone_store = QuoteStore::open(phone.clone()).await;

    let quote = laptop_store.save(Record::new("hello")).await.unwrap();
    laptop.push_local_changes().await.unwrap();
    phone.pull_remote_changes().await.unwrap();
    phone_store.refresh().await;
    assert_eq!(phone_store.quotes().await.len(), 1);

    phone_store
        .edit(quote.id(), "hello, world")
        .await
        .unwrap()
        .unwrap();
    phone.push_local_changes().await.unwrap();
    laptop.pull_remote_changes().await.unwrap();
    laptop_store.refresh().await;
    assert_eq!(
        laptop_store.get(quote.id()).await.unwrap().text(),
        "hello, world"
    );

    let current = laptop_store.get(quote.id()).await.unwrap();
    assert!(laptop_store.remove(&current).await.unwrap());
    laptop.push_local_changes().await.unwrap();
    phone.pull_remote_changes().await.unwrap();
    phone_store.refresh().await;

    assert!(phone_store.quotes().await.is_empty());
    assert!(cloud.records("Quotes").is_empty());
}
