//! Canonical serialization.
//!
//! Every payload the engine persists or checksums goes through these two
//! functions. The encoding is UTF-8 JSON with object keys in insertion
//! order, so a value serialized at write time re-serializes byte-for-byte
//! at read time and checksums over serialized substrings are reproducible.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload could not be encoded or decoded. Never retried; the operation
/// that hit it fails outright.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("failed to serialize {context}: {source}")]
    Encode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Encode a value as canonical JSON. `context` names the payload in errors.
pub fn to_canonical<T: Serialize>(
    value: &T,
    context: &'static str,
) -> Result<String, SerializationError> {
    serde_json::to_string(value).map_err(|source| SerializationError::Encode { context, source })
}

/// Decode a canonical JSON string.
pub fn from_canonical<T: DeserializeOwned>(
    text: &str,
    context: &'static str,
) -> Result<T, SerializationError> {
    serde_json::from_str(text).map_err(|source| SerializationError::Decode { context, source })
}
