//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roomcast_core::{ConnectionId, OutboundEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The writer task is gone; the socket is closed.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is at capacity.
    #[error("outbound queue full")]
    Full,
}

/// A connected WebSocket client.
///
/// Owned by its session task; the registry and the dispatcher hold `Arc`
/// clones and reach the socket only through the outbound queue.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Identity returned by the token check, if one ran.
    identity: Option<String>,
    /// Origin IP address.
    ip: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    connected_at: Instant,
    /// Whether the client has shown activity since the last ping.
    is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of frames dropped due to a full queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(
        id: ConnectionId,
        ip: impl Into<String>,
        identity: Option<String>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            ip: ip.into(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Origin IP address.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Queue a text frame for the client without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Serialize an envelope and queue it.
    pub fn send_envelope(&self, envelope: &OutboundEnvelope) -> Result<(), EnvelopeSendError> {
        let frame = envelope.to_frame()?;
        self.send(Arc::new(frame))?;
        Ok(())
    }

    /// Whether the socket is observably gone (writer task exited).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Failure of [`ClientConnection::send_envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeSendError {
    /// The envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The frame could not be queued.
    #[error(transparent)]
    Send(#[from] SendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), "10.0.0.1", None, tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.ip(), "10.0.0.1");
        assert!(conn.identity().is_none());
        assert!(!conn.is_closed());
    }

    #[test]
    fn identity_is_kept() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), "::1", Some("user-7".into()), tx);
        assert_eq!(conn.identity(), Some("user-7"));
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        conn.send(Arc::new("hello".into())).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn send_to_closed_channel() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(conn.is_closed());
        assert_eq!(conn.send(Arc::new("hello".into())), Err(SendError::Closed));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_to_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), "10.0.0.1", None, tx);
        conn.send(Arc::new("msg1".into())).unwrap();
        assert_eq!(conn.send(Arc::new("msg2".into())), Err(SendError::Full));
        assert_eq!(conn.drop_count(), 1);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn send_envelope_serializes() {
        let (conn, mut rx) = make_connection();
        let envelope = OutboundEnvelope::new("subscribe", Some("room-1".into()), "OK");
        conn.send_envelope(&envelope).unwrap();
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["event"], "subscribe");
        assert_eq!(parsed["room"], "room-1");
        assert_eq!(parsed["result"], "OK");
    }

    #[test]
    fn send_envelope_to_closed_channel() {
        let (conn, rx) = make_connection();
        drop(rx);
        let envelope = OutboundEnvelope::new("subscribe", None, "OK");
        assert!(matches!(
            conn.send_envelope(&envelope),
            Err(EnvelopeSendError::Send(SendError::Closed))
        ));
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > age1);
        assert!(conn.last_pong_elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5 {
            conn.send(Arc::new(format!("msg_{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }
}
