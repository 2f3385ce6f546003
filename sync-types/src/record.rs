//! The synchronizable record and its remote representation.

use serde::{Deserialize, Serialize};

use crate::{RecordId, ZoneId};

/// System-assigned handle addressing a record in the remote store.
///
/// The change tag is the remote's version marker for the stored copy; it
/// changes every time the remote accepts a new version of the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle {
    /// Zone the record lives in.
    pub zone: ZoneId,
    /// Record name inside the zone (equal to the record's id).
    pub record_name: String,
    /// Remote version tag.
    pub change_tag: String,
}

/// A record as stored by (or sent to) the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record identifier (the remote record name).
    pub id: RecordId,
    /// Text field. Missing when the remote copy has no value for it.
    pub text: Option<String>,
    /// Handle of the stored copy. `None` for a record that is about to be
    /// created remotely.
    pub handle: Option<RemoteHandle>,
}

/// A note record - the unit of synchronization.
///
/// Records are immutable values: every mutation returns a new record, so the
/// copy held by the local cache never aliases an outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_handle: Option<RemoteHandle>,
}

impl Record {
    /// Create a new record with a freshly generated id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: RecordId::generate(),
            text: text.into(),
            remote_handle: None,
        }
    }

    /// Create a record with an explicit id and no remote handle.
    pub fn with_id(id: RecordId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            remote_handle: None,
        }
    }

    /// The empty placeholder used by an editor before the record exists.
    pub fn placeholder() -> Self {
        Self::with_id(RecordId::placeholder(), "")
    }

    /// Build a local record from a remote payload.
    ///
    /// A missing remote text becomes the empty string.
    pub fn from_remote(remote: &RemoteRecord) -> Self {
        Self {
            id: remote.id.clone(),
            text: remote.text.clone().unwrap_or_default(),
            remote_handle: remote.handle.clone(),
        }
    }

    /// Record identifier.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Text payload.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Remote handle, if the record has been created remotely.
    pub fn remote_handle(&self) -> Option<&RemoteHandle> {
        self.remote_handle.as_ref()
    }

    /// Whether this record has not been persisted yet.
    pub fn is_new(&self) -> bool {
        self.id.is_placeholder()
    }

    /// Whether the remote store holds a copy of this record.
    pub fn is_known_remotely(&self) -> bool {
        self.remote_handle.is_some()
    }

    /// Return a copy with new text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }

    /// Return a copy carrying a new remote handle; text is untouched.
    pub fn with_remote_handle(&self, handle: RemoteHandle) -> Self {
        Self {
            remote_handle: Some(handle),
            ..self.clone()
        }
    }

    /// Return a copy with a freshly assigned id if this is a placeholder.
    pub fn assign_id(self) -> Self {
        if self.is_new() {
            Self {
                id: RecordId::generate(),
                ..self
            }
        } else {
            self
        }
    }

    /// Overwrite text and handle from a remote payload (remote wins).
    ///
    /// Text is kept when the remote copy carries none.
    pub fn overwritten_by(&self, remote: &RemoteRecord) -> Self {
        Self {
            id: self.id.clone(),
            text: remote.text.clone().unwrap_or_else(|| self.text.clone()),
            remote_handle: remote.handle.clone(),
        }
    }

    /// The outgoing payload for this record.
    pub fn to_remote(&self) -> RemoteRecord {
        RemoteRecord {
            id: self.id.clone(),
            text: Some(self.text.clone()),
            handle: self.remote_handle.clone(),
        }
    }
}
