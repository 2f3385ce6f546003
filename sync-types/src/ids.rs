//! Identity and progress types for quotesync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::SyncError;

/// Stable identifier of a record.
///
/// Assigned once at creation and never reassigned. The empty string is the
/// placeholder for a record that has not been created yet.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a fresh, globally unique RecordId (UUID v4, upper-case).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().hyphenated().to_string().to_uppercase())
    }

    /// The placeholder id of a record that is not yet persisted.
    pub fn placeholder() -> Self {
        Self(String::new())
    }

    /// Wrap an existing identifier string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Whether this is the "not yet created" placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            write!(f, "RecordId(<new>)")
        } else {
            write!(f, "RecordId({})", self.0)
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Name of a partition in the remote store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    /// Create a zone id, rejecting empty names.
    pub fn new(name: impl Into<String>) -> Result<Self, SyncError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SyncError::InvalidData("zone name must not be empty".into()));
        }
        Ok(Self(name))
    }

    /// The zone name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZoneId({})", self.0)
    }
}

/// Opaque progress marker handed out by the remote store.
///
/// Represents "everything received up to here". The coordinator persists it
/// and hands it back when a session is reopened; only the remote side knows
/// how to read the bytes. Serialized as URL-safe base64.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SyncCursor(Vec<u8>);

impl SyncCursor {
    /// Wrap raw cursor bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode remote resume state into a cursor (MessagePack).
    pub fn encode<T: Serialize>(state: &T) -> Result<Self, SyncError> {
        rmp_serde::to_vec(state)
            .map(Self)
            .map_err(SyncError::CursorEncode)
    }

    /// Decode remote resume state from a cursor (MessagePack).
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        rmp_serde::from_slice(&self.0).map_err(SyncError::CursorDecode)
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl fmt::Debug for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncCursor({} bytes)", self.0.len())
    }
}

impl Serialize for SyncCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SyncCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_not_placeholders() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
        assert!(!a.is_placeholder());
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(a.as_str(), a.as_str().to_uppercase());
    }

    #[test]
    fn placeholder_is_empty() {
        let id = RecordId::placeholder();
        assert!(id.is_placeholder());
        assert_eq!(id.as_str(), "");
        assert_eq!(format!("{:?}", id), "RecordId(<new>)");
    }

    #[test]
    fn record_id_serializes_as_plain_string() {
        let id = RecordId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn zone_id_rejects_empty_name() {
        assert!(ZoneId::new("").is_err());
        assert_eq!(ZoneId::new("Quotes").unwrap().name(), "Quotes");
    }

    #[test]
    fn cursor_serializes_as_base64() {
        let cursor = SyncCursor::from_bytes(vec![0xFF, 0x00, 0x10]);
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(json, "\"_wAQ\"");

        let restored: SyncCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cursor);
    }

    #[test]
    fn cursor_rejects_invalid_base64() {
        let result: Result<SyncCursor, _> = serde_json::from_str("\"***\"");
        assert!(result.is_err());
    }

    #[test]
    fn cursor_carries_remote_state() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Resume {
            seq: u64,
        }

        let cursor = SyncCursor::encode(&Resume { seq: 42 }).unwrap();
        let state: Resume = cursor.decode().unwrap();
        assert_eq!(state, Resume { seq: 42 });
    }

    #[test]
    fn cursor_decode_of_garbage_fails() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Resume {
            seq: u64,
        }

        let cursor = SyncCursor::from_bytes(vec![0xC1]);
        let result: Result<Resume, _> = cursor.decode();
        assert!(matches!(result, Err(SyncError::CursorDecode(_))));
    }
}
