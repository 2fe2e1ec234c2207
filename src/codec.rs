//! Body (de)serialization seam.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Response body could not be turned into the requested type.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode response body: {message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Request body could not be serialized.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode request body: {message}")]
pub struct EncodeError {
    message: String,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Turns bytes into typed values and back.
pub trait Codec: Send + Sync {
    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, DecodeError>;
    fn encode<B: Serialize + ?Sized>(&self, body: &B) -> Result<Vec<u8>, EncodeError>;
}

/// JSON via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError::new(e.to_string()))
    }

    fn encode<B: Serialize + ?Sized>(&self, body: &B) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(body).map_err(|e| EncodeError::new(e.to_string()))
    }
}
