//! Error types for quotesync.

use thiserror::Error;

/// Errors that can occur while encoding or decoding sync data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization of a persisted blob failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization of a persisted blob failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// MessagePack encoding of remote resume state failed
    #[error("cursor encoding failed: {0}")]
    CursorEncode(#[source] rmp_serde::encode::Error),

    /// MessagePack decoding of remote resume state failed
    #[error("cursor decoding failed: {0}")]
    CursorDecode(#[source] rmp_serde::decode::Error),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// Serialize a value to JSON bytes, mapping the error.
    pub fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(value).map_err(SyncError::Serialization)
    }

    /// Deserialize a value from JSON bytes, mapping the error.
    pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
        serde_json::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}
