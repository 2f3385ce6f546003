//! Pending-change ledger for quotesync.
//!
//! This module tracks which records (and zones) are queued for upload since
//! the last confirmed send:
//! - One entry per record id; repeated intents collapse, latest wins
//! - Entries stay pending until the remote confirms them
//! - Failed sends leave the entry in place for the next attempt
//!
//! The ledger is serializable so the coordinator can persist it and resume
//! after a restart.

use std::collections::BTreeMap;

use quotesync_types::{PendingAction, RecordId, ZoneChange, ZoneId};
use serde::{Deserialize, Serialize};

use crate::{CoreError, SendScope};

/// A pending intent for one record, as handed to batch building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// The record the intent is for.
    pub id: RecordId,
    /// What to do with the remote copy.
    pub action: PendingAction,
}

/// Bookkeeping for one pending record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Latest requested action.
    pub action: PendingAction,
    /// Insertion order, used to keep batches FIFO.
    seq: u64,
    /// Number of failed send attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Error message of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// How an enqueue collapsed with any existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// No entry existed; a new one was added.
    Inserted,
    /// The same action was already pending; nothing changed.
    Merged,
    /// A different action was pending and has been replaced.
    Replaced,
    /// A delete arrived for a record whose save was never sent; the entry
    /// is gone and nothing will be sent.
    Cancelled,
}

/// Pending-change ledger.
///
/// Entries flow through the ledger in this order:
/// 1. `enqueue()` - record the intent
/// 2. `drain()` - read the intents matching a send scope (nothing is removed)
/// 3. `confirm()` - remove after the remote confirmed the send
///
/// If a send fails, call `fail()`: the entry stays for the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedger {
    /// Zone every record of this ledger lives in.
    zone: ZoneId,
    /// Pending record intents by id.
    records: BTreeMap<RecordId, PendingEntry>,
    /// Pending zone-level changes, at most one per zone.
    #[serde(default)]
    zones: Vec<ZoneChange>,
    /// Next insertion sequence number.
    next_seq: u64,
}

impl ChangeLedger {
    /// Create an empty ledger for records living in `zone`.
    pub fn new(zone: ZoneId) -> Self {
        Self {
            zone,
            records: BTreeMap::new(),
            zones: Vec::new(),
            next_seq: 0,
        }
    }

    /// The zone this ledger's records belong to.
    pub fn zone(&self) -> &ZoneId {
        &self.zone
    }

    /// Record an intent for `id`.
    ///
    /// Collapse rules:
    /// - save after save, delete after delete: no-op merge
    /// - save after delete: replaced by the save
    /// - delete after save: the entry is cancelled entirely
    pub fn enqueue(&mut self, id: RecordId, action: PendingAction) -> Result<Enqueued, CoreError> {
        if id.is_placeholder() {
            return Err(CoreError::PlaceholderRecord);
        }

        let existing = self.records.get(&id).map(|entry| entry.action);
        let outcome = match (existing, action) {
            (None, _) => {
                let seq = self.bump_seq();
                self.records.insert(
                    id,
                    PendingEntry {
                        action,
                        seq,
                        attempts: 0,
                        last_error: None,
                    },
                );
                Enqueued::Inserted
            }
            (Some(current), requested) if current == requested => Enqueued::Merged,
            (Some(PendingAction::Save), PendingAction::Delete) => {
                self.records.remove(&id);
                Enqueued::Cancelled
            }
            (Some(_), requested) => {
                let seq = self.bump_seq();
                if let Some(entry) = self.records.get_mut(&id) {
                    entry.action = requested;
                    entry.seq = seq;
                    entry.attempts = 0;
                    entry.last_error = None;
                }
                Enqueued::Replaced
            }
        };
        Ok(outcome)
    }

    /// Record a zone-level change. A later change for the same zone replaces
    /// the earlier one.
    pub fn enqueue_zone(&mut self, change: ZoneChange) -> Enqueued {
        match self.zones.iter_mut().find(|c| c.zone() == change.zone()) {
            Some(existing) if *existing == change => Enqueued::Merged,
            Some(existing) => {
                *existing = change;
                Enqueued::Replaced
            }
            None => {
                self.zones.push(change);
                Enqueued::Inserted
            }
        }
    }

    /// Pending record intents matching `scope`, oldest first.
    ///
    /// Nothing is removed; removal happens on [`confirm`](Self::confirm) or
    /// [`discard`](Self::discard).
    pub fn drain(&self, scope: &SendScope) -> Vec<PendingChange> {
        let mut matching: Vec<(&RecordId, &PendingEntry)> = self
            .records
            .iter()
            .filter(|(id, _)| scope.contains_record(&self.zone, id))
            .collect();
        matching.sort_by_key(|(_, entry)| entry.seq);
        matching
            .into_iter()
            .map(|(id, entry)| PendingChange {
                id: id.clone(),
                action: entry.action,
            })
            .collect()
    }

    /// Pending zone changes matching `scope`.
    pub fn drain_zones(&self, scope: &SendScope) -> Vec<ZoneChange> {
        self.zones
            .iter()
            .filter(|change| scope.contains_zone(change.zone()))
            .cloned()
            .collect()
    }

    /// Remove an entry after the remote confirmed `action` for it.
    ///
    /// An entry whose action changed since the send stays pending.
    pub fn confirm(&mut self, id: &RecordId, action: PendingAction) -> bool {
        match self.records.get(id) {
            Some(entry) if entry.action == action => {
                self.records.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Remove a confirmed zone change.
    pub fn confirm_zone(&mut self, change: &ZoneChange) -> bool {
        let before = self.zones.len();
        self.zones.retain(|c| c != change);
        before != self.zones.len()
    }

    /// Note a failed send; the entry stays pending.
    pub fn fail(&mut self, id: &RecordId, error: impl Into<String>) -> bool {
        match self.records.get_mut(id) {
            Some(entry) => {
                entry.attempts = entry.attempts.saturating_add(1);
                entry.last_error = Some(error.into());
                true
            }
            None => false,
        }
    }

    /// Drop an entry without sending it (its record no longer exists).
    pub fn discard(&mut self, id: &RecordId) -> bool {
        self.records.remove(id).is_some()
    }

    /// Look up the entry for a record.
    pub fn get(&self, id: &RecordId) -> Option<&PendingEntry> {
        self.records.get(id)
    }

    /// Iterate pending record entries by id.
    pub fn entries(&self) -> impl Iterator<Item = (&RecordId, &PendingEntry)> {
        self.records.iter()
    }

    /// Number of pending record intents.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record intents are pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of pending zone changes.
    pub fn zone_len(&self) -> usize {
        self.zones.len()
    }

    /// Whether nothing at all is pending.
    pub fn is_idle(&self) -> bool {
        self.records.is_empty() && self.zones.is_empty()
    }

    /// Clear everything.
    pub fn clear(&mut self) {
        self.records.clear();
        self.zones.clear();
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }
}
