//! Fanout dispatcher: drains the distribution queue and broadcasts each
//! message to the subscribers of its room.

use std::sync::Arc;

use metrics::counter;
use roomcast_core::{DistributionMessage, ErrorReporter, OutboundEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics as names;
use crate::registry::RoomRegistry;
use crate::websocket::connection::SendError;

const COMPONENT: &str = "fanout-dispatcher";

/// A message the transform resolved to a room and an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routed {
    /// Target room.
    pub room: String,
    /// Frame to send to every member.
    pub envelope: OutboundEnvelope,
}

/// Errors that stop the dispatcher.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// The transform failed.
    #[error("transform failed: {0}")]
    Transform(String),
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Maps a broker message to the room and envelope it should be sent as.
///
/// `Ok(None)` means the message is not supported and is discarded; the
/// transform logs why.
pub trait FanoutTransform: Send + Sync + 'static {
    /// Route one message.
    fn transform(&self, message: &DistributionMessage) -> Result<Option<Routed>, FanoutError>;
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No clients were connected.
    NoClients,
    /// The transform declined the message.
    Unsupported,
    /// The routed room is not configured.
    UnknownRoom(String),
    /// Broadcast ran.
    Delivered {
        /// Frames queued.
        sent: usize,
        /// Frames dropped on full queues.
        dropped: usize,
        /// Closed connections evicted.
        evicted: usize,
    },
}

/// Consumes the distribution queue. Single instance per gateway.
pub struct FanoutDispatcher {
    registry: Arc<RoomRegistry>,
    transform: Arc<dyn FanoutTransform>,
    queue: mpsc::Receiver<DistributionMessage>,
    reporter: ErrorReporter,
}

impl FanoutDispatcher {
    /// Create a dispatcher.
    pub fn new(
        registry: Arc<RoomRegistry>,
        transform: Arc<dyn FanoutTransform>,
        queue: mpsc::Receiver<DistributionMessage>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            registry,
            transform,
            queue,
            reporter,
        }
    }

    /// Dispatch messages in queue order until cancelled, the queue closes,
    /// or a dispatch error is reported.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                () = token.cancelled() => break,
                message = self.queue.recv() => message,
            };
            let Some(message) = message else {
                debug!("distribution queue closed");
                break;
            };
            if let Err(err) = self.dispatch(&message) {
                error!(action = %message.action, error = %err, "fanout failed");
                self.reporter.report(COMPONENT, "Queue Handler", err);
                break;
            }
        }
        self.queue.close();
        debug!("fanout dispatcher stopped");
    }

    /// Broadcast one message to its room.
    ///
    /// Sends are sequential and never wait; a failed recipient does not
    /// affect the others.
    pub fn dispatch(&self, message: &DistributionMessage) -> Result<DispatchOutcome, FanoutError> {
        if self.registry.count() == 0 {
            debug!(action = %message.action, "no clients connected, message discarded");
            return Ok(DispatchOutcome::NoClients);
        }

        let Some(Routed { room, envelope }) = self.transform.transform(message)? else {
            return Ok(DispatchOutcome::Unsupported);
        };

        if !self.registry.room_exists(&room) {
            warn!(room = %room, action = %message.action, "message for unknown room discarded");
            return Ok(DispatchOutcome::UnknownRoom(room));
        }

        let members = self.registry.members_of(&room);
        if members.is_empty() {
            return Ok(DispatchOutcome::Delivered {
                sent: 0,
                dropped: 0,
                evicted: 0,
            });
        }

        let frame = Arc::new(envelope.to_frame()?);
        let (mut sent, mut dropped, mut evicted) = (0, 0, 0);
        for member in members {
            match member.send(Arc::clone(&frame)) {
                Ok(()) => sent += 1,
                Err(SendError::Full) => {
                    dropped += 1;
                    warn!(conn_id = %member.id, room = %room, "outbound queue full, frame dropped");
                }
                Err(SendError::Closed) => {
                    if self.registry.remove_connection(&member.id) {
                        evicted += 1;
                        info!(conn_id = %member.id, connections = self.registry.count(), "evicted closed client during fanout");
                    }
                }
            }
        }

        counter!(names::FANOUT_FRAMES_SENT_TOTAL).increment(sent as u64);
        counter!(names::FANOUT_FRAMES_DROPPED_TOTAL).increment(dropped as u64);
        counter!(names::CONNECTIONS_EVICTED_TOTAL).increment(evicted as u64);
        debug!(room = %room, sent, dropped, evicted, "broadcast");
        Ok(DispatchOutcome::Delivered { sent, dropped, evicted })
    }
}
