//! Ordered record collection with an id index.
//!
//! Records are stored in insertion order; a side index maps each id to its
//! slot. Mutations replace the value in the owning slot, never the slot
//! itself, so order is stable across edits.

use std::collections::HashMap;

use quotesync_types::{Record, RecordId};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// The authoritative local record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Record>", into = "Vec<Record>")]
pub struct RecordSet {
    slots: Vec<Record>,
    index: HashMap<RecordId, usize>,
}

impl RecordSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a sequence of records.
    ///
    /// A later record with an id already present replaces the earlier value
    /// in place. Placeholder records are skipped.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut set = Self::new();
        for record in records {
            if let Err(e) = set.upsert(record) {
                tracing::warn!("Skipping record without an id: {}", e);
            }
        }
        set
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up a record by id.
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.index.get(id).and_then(|&slot| self.slots.get(slot))
    }

    /// Check whether a record with this id exists.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.index.contains_key(id)
    }

    /// Insert a new record at the end, or replace the record with the same id
    /// in its slot.
    ///
    /// Returns the previous value when one was replaced.
    pub fn upsert(&mut self, record: Record) -> Result<Option<Record>, CoreError> {
        if record.is_new() {
            return Err(CoreError::PlaceholderRecord);
        }
        match self.index.get(record.id()) {
            Some(&slot) => Ok(Some(std::mem::replace(&mut self.slots[slot], record))),
            None => {
                self.index.insert(record.id().clone(), self.slots.len());
                self.slots.push(record);
                Ok(None)
            }
        }
    }

    /// Replace an existing record in its slot.
    ///
    /// Fails with [`CoreError::MissingRecord`] if no record with that id
    /// exists.
    pub fn replace(&mut self, record: Record) -> Result<Record, CoreError> {
        let slot = self
            .index
            .get(record.id())
            .copied()
            .filter(|&slot| slot < self.slots.len())
            .ok_or_else(|| CoreError::MissingRecord(record.id().clone()))?;
        Ok(std::mem::replace(&mut self.slots[slot], record))
    }

    /// Remove a record by id, returning it if present.
    pub fn remove(&mut self, id: &RecordId) -> Option<Record> {
        let slot = self.index.remove(id)?;
        let removed = self.slots.remove(slot);
        for later in &self.slots[slot..] {
            if let Some(entry) = self.index.get_mut(later.id()) {
                *entry -= 1;
            }
        }
        Some(removed)
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    /// Iterate records in order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.slots.iter()
    }

    /// Ids in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.slots.iter().map(|r| r.id().clone()).collect()
    }

    /// Borrow the records as a slice.
    pub fn as_slice(&self) -> &[Record] {
        &self.slots
    }

    /// Consume the set, returning the records in order.
    pub fn into_vec(self) -> Vec<Record> {
        self.slots
    }
}

impl From<Vec<Record>> for RecordSet {
    fn from(records: Vec<Record>) -> Self {
        Self::from_records(records)
    }
}

impl From<RecordSet> for Vec<Record> {
    fn from(set: RecordSet) -> Self {
        set.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str) -> Record {
        Record::with_id(RecordId::new(id), text)
    }

    #[test]
    fn upsert_appends_new_records_in_order() {
        let mut set = RecordSet::new();
        set.upsert(record("A", "hello")).unwrap();
        set.upsert(record("B", "world")).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.ids(), vec![RecordId::new("A"), RecordId::new("B")]);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut set = RecordSet::new();
        set.upsert(record("A", "hello")).unwrap();
        set.upsert(record("B", "world")).unwrap();

        let previous = set.upsert(record("A", "howdy")).unwrap();

        assert_eq!(previous.unwrap().text(), "hello");
        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice()[0].text(), "howdy");
    }

    #[test]
    fn upsert_rejects_placeholder() {
        let mut set = RecordSet::new();
        let result = set.upsert(Record::placeholder());
        assert_eq!(result, Err(CoreError::PlaceholderRecord));
        assert!(set.is_empty());
    }

    #[test]
    fn replace_missing_is_invariant_violation() {
        let mut set = RecordSet::new();
        let result = set.replace(record("ghost", "boo"));
        assert_eq!(result, Err(CoreError::MissingRecord(RecordId::new("ghost"))));
    }

    #[test]
    fn remove_reindexes_following_slots() {
        let mut set = RecordSet::new();
        set.upsert(record("A", "1")).unwrap();
        set.upsert(record("B", "2")).unwrap();
        set.upsert(record("C", "3")).unwrap();

        let removed = set.remove(&RecordId::new("A")).unwrap();
        assert_eq!(removed.text(), "1");

        assert_eq!(set.get(&RecordId::new("B")).unwrap().text(), "2");
        assert_eq!(set.get(&RecordId::new("C")).unwrap().text(), "3");

        set.replace(record("C", "three")).unwrap();
        assert_eq!(set.as_slice()[1].text(), "three");
    }

    #[test]
    fn remove_absent_is_none() {
        let mut set = RecordSet::new();
        assert!(set.remove(&RecordId::new("nope")).is_none());
    }

    #[test]
    fn from_records_collapses_duplicate_ids() {
        let set = RecordSet::from_records(vec![
            record("A", "first"),
            record("B", "b"),
            record("A", "second"),
            Record::placeholder(),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice()[0].text(), "second");
    }

    #[test]
    fn serializes_as_plain_list() {
        let set = RecordSet::from_records(vec![record("A", "hello")]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"[{"id":"A","text":"hello"}]"#);

        let restored: RecordSet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn decoding_skips_records_without_an_id() {
        let json = r#"[{"id":"","text":"lost"},{"id":"A","text":"hello"}]"#;
        let restored: RecordSet = serde_json::from_str(json).unwrap();

        assert_eq!(restored.ids(), vec![RecordId::new("A")]);
    }
}
