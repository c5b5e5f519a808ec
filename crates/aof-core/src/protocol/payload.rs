//! MessagePack helpers for request and response payloads.
//!
//! Typed payloads go through `rmp-serde`; structs are written as maps
//! (`to_vec_named`) because the server looks fields up by name.  Values whose
//! shape is only known at runtime (cached resources, event payloads) use
//! `rmpv::Value`.

use rmpv::Value;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Deepest array/map nesting accepted from the server.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Errors that can occur while encoding or decoding a MessagePack payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The buffer held a complete value followed by extra bytes.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Encodes `value` as MessagePack with struct fields written as map keys.
///
/// # Errors
///
/// Returns [`PayloadError::Encode`] if serialization fails.
pub fn encode_named<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, PayloadError> {
    rmp_serde::to_vec_named(value).map_err(|e| PayloadError::Encode(e.to_string()))
}

/// Decodes a typed payload.
///
/// # Errors
///
/// Returns [`PayloadError::Decode`] if the bytes do not match `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PayloadError> {
    rmp_serde::from_slice(bytes).map_err(|e| PayloadError::Decode(e.to_string()))
}

/// Encodes a dynamic value.
///
/// # Errors
///
/// Returns [`PayloadError::Encode`] if writing fails.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, PayloadError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).map_err(|e| PayloadError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decodes exactly one dynamic value from `bytes`.
///
/// # Errors
///
/// Returns [`PayloadError::Decode`] for malformed input and
/// [`PayloadError::TrailingBytes`] if bytes remain after the value.  Nesting
/// deeper than [`MAX_NESTING_DEPTH`] is malformed input.
pub fn decode_value(bytes: &[u8]) -> Result<Value, PayloadError> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value_with_max_depth(&mut cursor, MAX_NESTING_DEPTH)
        .map_err(|e| PayloadError::Decode(e.to_string()))?;
    if !cursor.is_empty() {
        return Err(PayloadError::TrailingBytes(cursor.len()));
    }
    Ok(value)
}
