//! Wire codec shared by the RPC transport and the hydration bridge.
//!
//! Everything that crosses a boundary (an RPC request or response, a cache
//! entry embedded in a page) goes through [`encode`] and [`decode`], so values
//! such as timestamps come back exactly as they went in.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::Decode(e.to_string()))
}

pub fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn to_text(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Serializes `value` for embedding inside an HTML `<script>` element.
///
/// `<`, `>` and `&` are written as unicode escapes so the payload can never
/// close the surrounding element; JSON parsers read them back unchanged.
pub fn to_script_safe_string(value: &Value) -> Result<String, CodecError> {
    Ok(to_text(value)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026"))
}
