//! Applying remote deltas to the local record set.
//!
//! Remote wins: a fetched modification overwrites the local text and remote
//! handle of the record with the same id, or appends a new record. Fetched
//! deletions remove the matching record if present.

use quotesync_types::{Record, RecordId, RemoteRecord};

use crate::{CoreError, RecordSet};

/// What applying a remote delta did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Existing records overwritten from the remote.
    pub edited: Vec<RecordId>,
    /// Records created from the remote.
    pub added: Vec<RecordId>,
    /// Records removed.
    pub deleted: Vec<RecordId>,
    /// Deletions for records not present locally.
    pub missing_deletions: Vec<RecordId>,
    /// Remote records without a usable id.
    pub ignored: usize,
}

impl ApplyReport {
    /// Whether the record set changed.
    pub fn changed(&self) -> bool {
        !(self.edited.is_empty() && self.added.is_empty() && self.deleted.is_empty())
    }
}

/// Apply fetched modifications, then deletions, to `records`.
///
/// On error the set may be partially updated; the caller must discard it
/// rather than persist it.
pub fn apply_fetched(
    records: &mut RecordSet,
    modifications: &[RemoteRecord],
    deletions: &[RecordId],
) -> Result<ApplyReport, CoreError> {
    let mut report = ApplyReport::default();

    for remote in modifications {
        if remote.id.is_placeholder() {
            report.ignored += 1;
            continue;
        }
        let existing = records.get(&remote.id).cloned();
        match existing {
            Some(local) => {
                records.replace(local.overwritten_by(remote))?;
                report.edited.push(remote.id.clone());
            }
            None => {
                records.upsert(Record::from_remote(remote))?;
                report.added.push(remote.id.clone());
            }
        }
    }

    for id in deletions {
        match records.remove(id) {
            Some(_) => report.deleted.push(id.clone()),
            None => report.missing_deletions.push(id.clone()),
        }
    }

    Ok(report)
}

/// Write back the handles the remote assigned to confirmed saves.
///
/// Only the handle changes; local text is kept since it may have been edited
/// after the batch went out. Records removed locally meanwhile are skipped.
/// Returns the number of records updated.
pub fn apply_saved(records: &mut RecordSet, saved: &[RemoteRecord]) -> Result<usize, CoreError> {
    let mut updated = 0;
    for remote in saved {
        let Some(handle) = remote.handle.clone() else {
            continue;
        };
        let Some(local) = records.get(&remote.id).cloned() else {
            continue;
        };
        if local.remote_handle() != Some(&handle) {
            records.replace(local.with_remote_handle(handle))?;
            updated += 1;
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotesync_types::{RemoteHandle, ZoneId};

    fn id(s: &str) -> RecordId {
        RecordId::new(s)
    }

    fn handle(name: &str, tag: &str) -> RemoteHandle {
        RemoteHandle {
            zone: ZoneId::new("Quotes").unwrap(),
            record_name: name.into(),
            change_tag: tag.into(),
        }
    }

    fn remote(name: &str, text: &str, tag: &str) -> RemoteRecord {
        RemoteRecord {
            id: id(name),
            text: Some(text.into()),
            handle: Some(handle(name, tag)),
        }
    }

    #[test]
    fn modification_of_known_record_overwrites() {
        let mut records = RecordSet::from_records(vec![Record::with_id(id("A"), "local")]);

        let report = apply_fetched(&mut records, &[remote("A", "remote", "t1")], &[]).unwrap();

        assert_eq!(report.edited, vec![id("A")]);
        let a = records.get(&id("A")).unwrap();
        assert_eq!(a.text(), "remote");
        assert_eq!(a.remote_handle(), Some(&handle("A", "t1")));
    }

    #[test]
    fn modification_of_unknown_record_appends() {
        let mut records = RecordSet::from_records(vec![Record::with_id(id("A"), "a")]);

        let report = apply_fetched(&mut records, &[remote("B", "b", "t1")], &[]).unwrap();

        assert_eq!(report.added, vec![id("B")]);
        assert_eq!(records.ids(), vec![id("A"), id("B")]);
    }

    #[test]
    fn deletions_remove_present_and_report_absent() {
        let mut records = RecordSet::from_records(vec![
            Record::with_id(id("A"), "a"),
            Record::with_id(id("B"), "b"),
        ]);

        let report = apply_fetched(&mut records, &[], &[id("A"), id("X")]).unwrap();

        assert_eq!(report.deleted, vec![id("A")]);
        assert_eq!(report.missing_deletions, vec![id("X")]);
        assert_eq!(records.ids(), vec![id("B")]);
    }

    #[test]
    fn modification_then_deletion_in_one_delta() {
        let mut records = RecordSet::new();

        let report = apply_fetched(&mut records, &[remote("A", "a", "t1")], &[id("A")]).unwrap();

        assert_eq!(report.added, vec![id("A")]);
        assert_eq!(report.deleted, vec![id("A")]);
        assert!(records.is_empty());
    }

    #[test]
    fn one_record_per_id_after_repeated_modifications() {
        let mut records = RecordSet::new();
        let delta = [remote("A", "v1", "t1"), remote("A", "v2", "t2")];

        apply_fetched(&mut records, &delta, &[]).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records.get(&id("A")).unwrap().text(), "v2");
    }

    #[test]
    fn placeholder_remote_records_are_ignored() {
        let mut records = RecordSet::new();
        let nameless = RemoteRecord {
            id: RecordId::placeholder(),
            text: Some("?".into()),
            handle: None,
        };

        let report = apply_fetched(&mut records, &[nameless], &[]).unwrap();

        assert_eq!(report.ignored, 1);
        assert!(!report.changed());
    }

    #[test]
    fn saved_handles_are_written_back_without_touching_text() {
        let mut records = RecordSet::from_records(vec![Record::with_id(id("A"), "edited since")]);
        let confirmed = remote("A", "as sent", "t9");

        let updated = apply_saved(&mut records, &[confirmed]).unwrap();

        assert_eq!(updated, 1);
        let a = records.get(&id("A")).unwrap();
        assert_eq!(a.text(), "edited since");
        assert_eq!(a.remote_handle(), Some(&handle("A", "t9")));
    }

    #[test]
    fn saved_handles_skip_records_removed_locally() {
        let mut records = RecordSet::new();
        let updated = apply_saved(&mut records, &[remote("A", "a", "t1")]).unwrap();
        assert_eq!(updated, 0);
        assert!(records.is_empty());
    }
}
