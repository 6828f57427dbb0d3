//! Turning delivery bodies into distribution messages.

use roomcast_core::DistributionMessage;
use thiserror::Error;

/// A delivery body that could not be decoded. Per-message; never fatal.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON or does not match the expected shape.
    #[error("invalid message body: {0}")]
    Json(#[from] serde_json::Error),
    /// Body parsed but was rejected by the decoder.
    #[error("rejected message: {0}")]
    Rejected(String),
}

/// Decodes raw delivery bodies.
///
/// Injected into the consumer so deployments can accept other payload
/// formats without touching the ack/reject logic.
pub trait MessageDecoder: Send + Sync + 'static {
    /// Decode one delivery body.
    fn decode(&self, body: &[u8]) -> Result<DistributionMessage, DecodeError>;
}

/// Default decoder: the body is a JSON [`DistributionMessage`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl MessageDecoder for JsonDecoder {
    fn decode(&self, body: &[u8]) -> Result<DistributionMessage, DecodeError> {
        let message: DistributionMessage = serde_json::from_slice(body)?;
        if message.action.is_empty() {
            return Err(DecodeError::Rejected("empty action".into()));
        }
        Ok(message)
    }
}
