//! Record store model shared by the bundled remotes.
//!
//! Zones map record names to stored records. Every accepted change is
//! appended to a change log; a session's position is the sequence number of
//! the last log entry it has seen. Fetches replay the log past that position,
//! skipping entries the fetching device wrote itself.

use std::collections::{BTreeMap, VecDeque};

use quotesync_core::{BatchRequest, ChangeBatch};
use quotesync_types::{RecordId, RemoteHandle, RemoteRecord, SyncCursor, ZoneId};
use serde::{Deserialize, Serialize};

use super::{BatchSource, FailedSave, FailureKind, RemoteError, SessionEvent};

/// What a cursor handed out by the bundled remotes encodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResumeState {
    /// Account the position belongs to.
    pub account: String,
    /// Device the session writes as.
    pub device: String,
    /// Last change-log sequence seen.
    pub position: u64,
}

impl ResumeState {
    /// Decode a cursor, treating an unreadable one as absent.
    pub fn from_cursor(cursor: Option<&SyncCursor>) -> Option<Self> {
        let cursor = cursor?;
        match cursor.decode() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring unreadable resume cursor, syncing from scratch: {}", e);
                None
            }
        }
    }

    /// Encode into an opaque cursor.
    pub fn to_cursor(&self) -> Result<SyncCursor, RemoteError> {
        SyncCursor::encode(self).map_err(|e| RemoteError::Corrupt(e.to_string()))
    }
}

/// The fixed part of a session.
#[derive(Debug, Clone)]
pub(crate) struct SessionContext {
    /// Device id written into log entries.
    pub device: String,
    /// Zone the session's records live in.
    pub zone: ZoneId,
    /// Record type the session reads and writes.
    pub record_type: String,
    /// Maximum record changes per batch.
    pub batch_limit: usize,
}

/// A failure the mock remote was told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InjectedFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRecord {
    record_type: String,
    record: RemoteRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
enum LoggedChange {
    Saved {
        record_type: String,
        record: RemoteRecord,
    },
    Deleted {
        zone: ZoneId,
        id: RecordId,
    },
    ZoneDeleted {
        zone: ZoneId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LogEntry {
    seq: u64,
    origin: String,
    #[serde(flatten)]
    change: LoggedChange,
}

/// One account's worth of remote data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CloudState {
    zones: BTreeMap<String, BTreeMap<String, StoredRecord>>,
    log: Vec<LogEntry>,
    next_tag: u64,
}

impl CloudState {
    /// Sequence number of the newest log entry.
    pub fn head(&self) -> u64 {
        self.log.last().map(|entry| entry.seq).unwrap_or(0)
    }

    /// Whether a zone exists.
    pub fn has_zone(&self, zone: &str) -> bool {
        self.zones.contains_key(zone)
    }

    /// Records stored in a zone, ordered by name.
    pub fn records(&self, zone: &str) -> Vec<RemoteRecord> {
        self.zones
            .get(zone)
            .map(|records| records.values().map(|s| s.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Drain `source` batch by batch, applying each one.
    pub fn send(
        &mut self,
        ctx: &SessionContext,
        source: &mut (dyn BatchSource + Send),
        injected: &mut VecDeque<InjectedFailure>,
    ) -> Vec<SessionEvent> {
        let request = BatchRequest::all(ctx.batch_limit);
        let mut events = Vec::new();
        while let Some(batch) = source.next_batch(&request) {
            tracing::debug!(
                "Applying batch: {} saves, {} deletions, {} zone changes",
                batch.records_to_save.len(),
                batch.records_to_delete.len(),
                batch.zones_to_save.len() + batch.zones_to_delete.len()
            );
            events.extend(self.apply_batch(ctx, batch, injected));
        }
        events
    }

    /// Apply one batch: zone changes first, then saves, then deletions.
    pub fn apply_batch(
        &mut self,
        ctx: &SessionContext,
        batch: ChangeBatch,
        injected: &mut VecDeque<InjectedFailure>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if !batch.zones_to_save.is_empty() || !batch.zones_to_delete.is_empty() {
            for zone in &batch.zones_to_save {
                self.zones.entry(zone.name().to_string()).or_default();
            }
            for zone in &batch.zones_to_delete {
                if self.zones.remove(zone.name()).is_some() {
                    self.append(&ctx.device, LoggedChange::ZoneDeleted { zone: zone.clone() });
                }
            }
            events.push(SessionEvent::SentDatabaseChanges {
                saved_zones: batch.zones_to_save,
                deleted_zones: batch.zones_to_delete,
                failed_zones: Vec::new(),
            });
        }

        if batch.records_to_save.is_empty() && batch.records_to_delete.is_empty() {
            return events;
        }

        let mut saved = Vec::new();
        let mut failed_saves = Vec::new();
        for outgoing in batch.records_to_save {
            if let Some(failure) = injected.pop_front() {
                failed_saves.push(FailedSave {
                    record: outgoing,
                    kind: failure.kind,
                    message: failure.message,
                });
                continue;
            }
            if !self.has_zone(ctx.zone.name()) {
                failed_saves.push(FailedSave {
                    message: format!("zone '{}' does not exist", ctx.zone),
                    record: outgoing,
                    kind: FailureKind::ZoneNotFound,
                });
                continue;
            }

            self.next_tag += 1;
            let stored = RemoteRecord {
                handle: Some(RemoteHandle {
                    zone: ctx.zone.clone(),
                    record_name: outgoing.id.as_str().to_string(),
                    change_tag: format!("{:08x}", self.next_tag),
                }),
                ..outgoing
            };
            if let Some(zone) = self.zones.get_mut(ctx.zone.name()) {
                zone.insert(
                    stored.id.as_str().to_string(),
                    StoredRecord {
                        record_type: ctx.record_type.clone(),
                        record: stored.clone(),
                    },
                );
            }
            self.append(
                &ctx.device,
                LoggedChange::Saved {
                    record_type: ctx.record_type.clone(),
                    record: stored.clone(),
                },
            );
            saved.push(stored);
        }

        let mut deleted = Vec::new();
        for id in batch.records_to_delete {
            let existed = self
                .zones
                .get_mut(ctx.zone.name())
                .and_then(|zone| zone.remove(id.as_str()))
                .is_some();
            if existed {
                self.append(
                    &ctx.device,
                    LoggedChange::Deleted {
                        zone: ctx.zone.clone(),
                        id: id.clone(),
                    },
                );
            }
            // Deleting something already gone succeeds
            deleted.push(id);
        }

        events.push(SessionEvent::SentRecordChanges {
            saved,
            deleted,
            failed_saves,
            failed_deletes: Vec::new(),
        });
        events
    }

    /// Changes after `position` written by other devices, collapsed to their
    /// final effect, plus the new position.
    pub fn changes_since(&self, ctx: &SessionContext, position: u64) -> (Vec<SessionEvent>, u64) {
        let mut deleted_zones: Vec<ZoneId> = Vec::new();
        let mut modifications: Vec<RemoteRecord> = Vec::new();
        let mut deletions: Vec<RecordId> = Vec::new();

        let unseen = self
            .log
            .iter()
            .filter(|entry| entry.seq > position && entry.origin != ctx.device);
        for entry in unseen {
            match &entry.change {
                LoggedChange::ZoneDeleted { zone } => {
                    if !deleted_zones.contains(zone) {
                        deleted_zones.push(zone.clone());
                    }
                    if *zone == ctx.zone {
                        modifications.clear();
                        deletions.clear();
                    }
                }
                LoggedChange::Saved {
                    record_type,
                    record,
                } if *record_type == ctx.record_type && in_zone(record, &ctx.zone) => {
                    deletions.retain(|id| *id != record.id);
                    match modifications.iter_mut().find(|m| m.id == record.id) {
                        Some(existing) => *existing = record.clone(),
                        None => modifications.push(record.clone()),
                    }
                }
                LoggedChange::Deleted { zone, id } if *zone == ctx.zone => {
                    modifications.retain(|m| m.id != *id);
                    if !deletions.contains(id) {
                        deletions.push(id.clone());
                    }
                }
                _ => {}
            }
        }

        let mut events = Vec::new();
        if !deleted_zones.is_empty() {
            events.push(SessionEvent::FetchedDatabaseChanges { deleted_zones });
        }
        if !modifications.is_empty() || !deletions.is_empty() {
            events.push(SessionEvent::FetchedRecordChanges {
                modifications,
                deletions,
            });
        }
        (events, self.head())
    }

    fn append(&mut self, origin: &str, change: LoggedChange) {
        let seq = self.head() + 1;
        self.log.push(LogEntry {
            seq,
            origin: origin.to_string(),
            change,
        });
    }
}

fn in_zone(record: &RemoteRecord, zone: &ZoneId) -> bool {
    record.handle.as_ref().map(|h| &h.zone) == Some(zone)
}
