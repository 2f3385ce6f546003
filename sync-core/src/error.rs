//! Error types for sync-core.

use quotesync_types::RecordId;
use thiserror::Error;

/// Errors raised by the pure sync logic.
///
/// Every variant signals a violated invariant of the local data model. The
/// caller must stop the operation instead of persisting a diverged state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A record without an id cannot be stored or queued.
    #[error("record has no id yet")]
    PlaceholderRecord,

    /// A record believed to exist locally was not found.
    #[error("record {0} should exist locally but was not found")]
    MissingRecord(RecordId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::MissingRecord(RecordId::new("A"));
        assert_eq!(err.to_string(), "record A should exist locally but was not found");
    }
}
