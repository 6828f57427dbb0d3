//! Public room service: the subscribe/unsubscribe command handler and the
//! `test update` fanout transform.
//!
//! Client commands:
//!
//! ```json
//! {"event": "subscribe", "room": "room-1"}
//! {"event": "unsubscribe", "room": "room-1"}
//! ```
//!
//! Every command gets exactly one reply envelope: `OK`, `unknown room: <room>`
//! or `unknown event: <event>`.

use std::sync::Arc;

use async_trait::async_trait;
use roomcast_core::{DistributionMessage, OutboundEnvelope};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::dispatcher::{FanoutError, FanoutTransform, Routed};
use crate::registry::RoomRegistry;
use crate::websocket::connection::ClientConnection;
use crate::websocket::handler::{HandlerError, MessageHandler, reply};

/// Message key carrying the command name.
pub const EVENT_KEY: &str = "event";
/// Message key carrying the room name.
pub const ROOM_KEY: &str = "room";

/// Client command: join a room.
pub const SUBSCRIBE: &str = "subscribe";
/// Client command: leave a room.
pub const UNSUBSCRIBE: &str = "unsubscribe";
/// Event name of broadcast updates.
pub const DATA_UPDATE: &str = "data update";
/// The one broker action the public service understands.
pub const TEST_UPDATE: &str = "test update";

/// Handles `subscribe` / `unsubscribe` commands against the registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoomCommandHandler;

#[async_trait]
impl MessageHandler for RoomCommandHandler {
    async fn handle(
        &self,
        connection: &Arc<ClientConnection>,
        registry: &RoomRegistry,
        message: Map<String, Value>,
    ) -> Result<(), HandlerError> {
        let event = display_value(message.get(EVENT_KEY));
        let room = message.get(ROOM_KEY).and_then(Value::as_str);

        let envelope = match event.as_str() {
            SUBSCRIBE | UNSUBSCRIBE => match room {
                Some(room) if registry.room_exists(room) => {
                    let changed = if event == SUBSCRIBE {
                        registry.subscribe(&connection.id, room)
                    } else {
                        registry.unsubscribe(&connection.id, room)
                    };
                    debug!(conn_id = %connection.id, event = %event, room, changed, "room command");
                    OutboundEnvelope::new(event, Some(room.to_owned()), "OK")
                }
                _ => {
                    // Non-string rooms are echoed as their JSON text
                    let echoed = message.get(ROOM_KEY).map(|value| display_value(Some(value)));
                    let requested = echoed.as_deref().unwrap_or("null");
                    debug!(conn_id = %connection.id, event = %event, room = %requested, "unknown room");
                    let result = format!("unknown room: {requested}");
                    OutboundEnvelope::new(event, echoed, result)
                }
            },
            _ => {
                debug!(conn_id = %connection.id, event = %event, "unknown event");
                let result = format!("unknown event: {event}");
                OutboundEnvelope::new(event, None, result)
            }
        };

        reply(connection, &envelope)
    }
}

/// Turns `test update` broker messages into `data update` broadcasts.
///
/// The target room is the message's own `room`, or `default_room` when the
/// producer did not pick one. String data is sent as is; any other JSON is
/// sent as its serialized text.
#[derive(Debug, Clone)]
pub struct PublicUpdateTransform {
    default_room: String,
}

impl PublicUpdateTransform {
    /// Create a transform routing room-less updates to `default_room`.
    pub fn new(default_room: impl Into<String>) -> Self {
        Self {
            default_room: default_room.into(),
        }
    }
}

impl Default for PublicUpdateTransform {
    fn default() -> Self {
        Self::new("room-1")
    }
}

impl FanoutTransform for PublicUpdateTransform {
    fn transform(&self, message: &DistributionMessage) -> Result<Option<Routed>, FanoutError> {
        if message.action != TEST_UPDATE {
            error!(action = %message.action, "unsupported action, message discarded");
            return Ok(None);
        }

        let room = message.room.clone().unwrap_or_else(|| self.default_room.clone());
        let result = match &message.data {
            Value::String(text) => text.clone(),
            other => serde_json::to_string(other)?,
        };
        Ok(Some(Routed {
            envelope: OutboundEnvelope::new(DATA_UPDATE, Some(room.clone()), result),
            room,
        }))
    }
}

/// Render a JSON field for a reply: strings bare, anything else as JSON.
fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "null".to_owned(),
    }
}
