//! Outbound batch building.
//!
//! The remote session pulls batches: it asks for "the next batch for this
//! scope, at most N changes" and the builder answers from the ledger and the
//! current record set. Each pending save is resolved against the current
//! local record at build time; a save whose record no longer exists is
//! dropped from the ledger instead of being sent.

use std::collections::{BTreeSet, HashSet};

use quotesync_types::{PendingAction, RecordId, RemoteRecord, ZoneChange, ZoneId};

use crate::{ChangeLedger, RecordSet};

/// Which pending changes a send request covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendScope {
    /// Everything pending.
    #[default]
    All,
    /// Only changes in these zones.
    Zones(BTreeSet<ZoneId>),
    /// Only these records.
    Records(BTreeSet<RecordId>),
}

impl SendScope {
    /// Scope covering the given zones.
    pub fn zones(zones: impl IntoIterator<Item = ZoneId>) -> Self {
        Self::Zones(zones.into_iter().collect())
    }

    /// Scope covering the given records.
    pub fn records(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self::Records(ids.into_iter().collect())
    }

    /// Whether a record living in `zone` is covered.
    pub fn contains_record(&self, zone: &ZoneId, id: &RecordId) -> bool {
        match self {
            SendScope::All => true,
            SendScope::Zones(zones) => zones.contains(zone),
            SendScope::Records(ids) => ids.contains(id),
        }
    }

    /// Whether a zone-level change for `zone` is covered.
    pub fn contains_zone(&self, zone: &ZoneId) -> bool {
        match self {
            SendScope::All => true,
            SendScope::Zones(zones) => zones.contains(zone),
            SendScope::Records(_) => false,
        }
    }
}

/// A request for the next outbound batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    /// Which changes may go into the batch.
    pub scope: SendScope,
    /// Maximum number of record changes in the batch.
    pub limit: usize,
}

impl BatchRequest {
    /// Request everything, at most `limit` record changes per batch.
    pub fn all(limit: usize) -> Self {
        Self {
            scope: SendScope::All,
            limit,
        }
    }
}

/// One outbound batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Zones to create if absent.
    pub zones_to_save: Vec<ZoneId>,
    /// Zones to delete.
    pub zones_to_delete: Vec<ZoneId>,
    /// Record payloads to save, built from the current local records.
    pub records_to_save: Vec<RemoteRecord>,
    /// Records to delete.
    pub records_to_delete: Vec<RecordId>,
}

impl ChangeBatch {
    /// Whether the batch carries nothing.
    pub fn is_empty(&self) -> bool {
        self.zones_to_save.is_empty()
            && self.zones_to_delete.is_empty()
            && self.records_to_save.is_empty()
            && self.records_to_delete.is_empty()
    }

    /// Number of record changes.
    pub fn record_count(&self) -> usize {
        self.records_to_save.len() + self.records_to_delete.len()
    }
}

/// Builds batches for one send pass.
///
/// Tracks what it already handed out so repeated requests in the same pass
/// make progress even though the ledger only shrinks on confirmation.
#[derive(Debug)]
pub struct BatchBuilder<'a> {
    ledger: &'a mut ChangeLedger,
    records: &'a RecordSet,
    handed_out: HashSet<RecordId>,
    zones_handed_out: HashSet<ZoneChange>,
    dropped: Vec<RecordId>,
}

impl<'a> BatchBuilder<'a> {
    /// Start a send pass over `ledger`, resolving saves against `records`.
    pub fn new(ledger: &'a mut ChangeLedger, records: &'a RecordSet) -> Self {
        Self {
            ledger,
            records,
            handed_out: HashSet::new(),
            zones_handed_out: HashSet::new(),
            dropped: Vec::new(),
        }
    }

    /// Build the next batch, or `None` when nothing in scope is left.
    pub fn next_batch(&mut self, request: &BatchRequest) -> Option<ChangeBatch> {
        let mut batch = ChangeBatch::default();

        for change in self.ledger.drain_zones(&request.scope) {
            if !self.zones_handed_out.insert(change.clone()) {
                continue;
            }
            match change {
                ZoneChange::Save(zone) => batch.zones_to_save.push(zone),
                ZoneChange::Delete(zone) => batch.zones_to_delete.push(zone),
            }
        }

        let limit = request.limit.max(1);
        for change in self.ledger.drain(&request.scope) {
            if batch.record_count() >= limit {
                break;
            }
            if self.handed_out.contains(&change.id) {
                continue;
            }
            match change.action {
                PendingAction::Save => match self.records.get(&change.id) {
                    Some(record) => batch.records_to_save.push(record.to_remote()),
                    None => {
                        // Deleted locally before it was ever sent
                        self.ledger.discard(&change.id);
                        self.dropped.push(change.id);
                        continue;
                    }
                },
                PendingAction::Delete => batch.records_to_delete.push(change.id.clone()),
            }
            self.handed_out.insert(change.id);
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    /// Ids whose pending saves were dropped because the record is gone.
    pub fn dropped(&self) -> &[RecordId] {
        &self.dropped
    }
}
