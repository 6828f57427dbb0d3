//! Inbound frame parsing and the per-connection message strategy.

use std::sync::Arc;

use async_trait::async_trait;
use roomcast_core::OutboundEnvelope;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::connection::{ClientConnection, EnvelopeSendError, SendError};
use crate::registry::RoomRegistry;

/// A client frame that is not a JSON object. Logged and skipped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotObject(&'static str),
}

/// An error a [`MessageHandler`] cannot recover from.
///
/// Ends the connection's session and is sent on the error channel.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A reply could not be serialized.
    #[error("failed to serialize reply: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Parse one inbound text frame into a JSON object.
pub fn parse_frame(text: &str) -> Result<Map<String, Value>, FrameError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(FrameError::NotObject("null")),
        Value::Bool(_) => Err(FrameError::NotObject("a boolean")),
        Value::Number(_) => Err(FrameError::NotObject("a number")),
        Value::String(_) => Err(FrameError::NotObject("a string")),
        Value::Array(_) => Err(FrameError::NotObject("an array")),
    }
}

/// Strategy invoked for every parsed client message.
///
/// Implementations may change the connection's room membership through the
/// registry and reply through [`reply`].
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message from `connection`.
    async fn handle(
        &self,
        connection: &Arc<ClientConnection>,
        registry: &RoomRegistry,
        message: Map<String, Value>,
    ) -> Result<(), HandlerError>;
}

/// Queue a reply envelope for `connection`.
///
/// A closed or full queue is not a handler failure: the frame is dropped
/// and the session notices the closed socket on its own.
pub fn reply(connection: &ClientConnection, envelope: &OutboundEnvelope) -> Result<(), HandlerError> {
    match connection.send_envelope(envelope) {
        Ok(()) => Ok(()),
        Err(EnvelopeSendError::Serialize(err)) => Err(HandlerError::Serialize(err)),
        Err(EnvelopeSendError::Send(SendError::Closed)) => {
            debug!(conn_id = %connection.id, "reply dropped, connection closed");
            Ok(())
        }
        Err(EnvelopeSendError::Send(SendError::Full)) => {
            warn!(conn_id = %connection.id, event = %envelope.event, "reply dropped, outbound queue full");
            metrics::counter!(crate::metrics::FANOUT_FRAMES_DROPPED_TOTAL).increment(1);
            Ok(())
        }
    }
}
