//! JSON encoding and decoding for the `taskdeck` wire protocol.
//!
//! Everything on the wire is JSON: GraphQL request/response bodies over
//! HTTP and `graphql-transport-ws` frames over the WebSocket.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A payload lacked the field the operation selects.
    #[error("missing field `{0}` in payload")]
    MissingField(&'static str),
    /// The operation name is not one the protocol knows.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// Operation variables were absent or of the wrong shape.
    #[error("invalid variables: {0}")]
    InvalidVariables(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Encodes a value as a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a value from a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes `data[field]` into `T`.
///
/// # Errors
///
/// Returns [`CodecError::MissingField`] if `field` is absent or null, or
/// [`CodecError::Serialization`] if it has the wrong shape.
pub fn decode_field<T: DeserializeOwned>(
    data: &serde_json::Value,
    field: &'static str,
) -> Result<T, CodecError> {
    match data.get(field) {
        None | Some(serde_json::Value::Null) => Err(CodecError::MissingField(field)),
        Some(value) => Ok(T::deserialize(value)?),
    }
}
