//! Wire shapes shared by the broker side and the client side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only frame shape the gateway sends to clients.
///
/// Serialized as `{"event": ..., "room": ... | null, "result": ...}`, one
/// JSON text frame per envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Event name, e.g. `"subscribe"` or `"data update"`.
    pub event: String,
    /// Room the frame refers to, if any.
    pub room: Option<String>,
    /// Result payload. Opaque to the gateway core.
    pub result: String,
}

impl OutboundEnvelope {
    /// Build an envelope.
    pub fn new(event: impl Into<String>, room: Option<String>, result: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            room,
            result: result.into(),
        }
    }

    /// Serialize to the single text frame sent over the socket.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded broker message waiting on the distribution queue.
///
/// Only `action` is required. The fanout transform decides which room it
/// targets and what ends up in the outbound `result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionMessage {
    /// What kind of update this is, e.g. `"test update"`.
    pub action: String,
    /// Explicit target room, when the producer chose one.
    #[serde(default)]
    pub room: Option<String>,
    /// Update payload.
    #[serde(default)]
    pub data: Value,
}

impl DistributionMessage {
    /// Build a message with a payload and no explicit room.
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            room: None,
            data,
        }
    }

    /// Set the target room.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }
}
