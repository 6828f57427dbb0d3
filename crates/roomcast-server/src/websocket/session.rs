//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roomcast_core::{ConnectionId, ErrorReporter};
use roomcast_settings::ServerSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::{MessageHandler, parse_frame};
use crate::auth::Admission;
use crate::metrics as names;
use crate::registry::RoomRegistry;

const COMPONENT: &str = "connection-handler";

/// How long cleanup waits for the writer to flush its close frame.
const WRITER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection timing and queue limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Close the connection after this long without a Pong.
    pub pong_timeout: Duration,
    /// Outbound frames buffered before new ones are dropped.
    pub outbound_capacity: usize,
}

impl From<&ServerSettings> for SessionLimits {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            ping_interval: Duration::from_secs(settings.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(settings.pong_timeout_secs),
            outbound_capacity: settings.outbound_queue_capacity.max(1),
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct SessionContext {
    /// Shared room registry.
    pub registry: Arc<RoomRegistry>,
    /// Message strategy.
    pub handler: Arc<dyn MessageHandler>,
    /// Error channel.
    pub reporter: ErrorReporter,
    /// Global cancellation.
    pub token: CancellationToken,
    /// Tracks running sessions so shutdown can wait for their cleanup.
    pub tracker: TaskTracker,
    /// Timing and queue limits.
    pub limits: SessionLimits,
}

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    ClientClosed,
    Cancelled,
    HandlerFailed,
    WriterStopped,
}

/// Run a WebSocket session for an admitted client.
///
/// 1. Registers the connection and spawns the outbound writer
/// 2. Parses incoming text frames and hands them to the message handler
/// 3. Ends on close, transport error, handler failure, writer exit
///    (write failure or pong timeout) or cancellation
/// 4. Unregisters and stops the writer, which drops the socket
#[instrument(skip_all, fields(conn_id = tracing::field::Empty, ip = %admission.ip))]
pub async fn run_ws_session(ws: WebSocket, admission: Admission, ctx: SessionContext) {
    let (ws_tx, mut ws_rx) = ws.split();

    let id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&id));
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.limits.outbound_capacity);
    let connection = Arc::new(ClientConnection::new(
        id.clone(),
        admission.ip.clone(),
        admission.identity.clone(),
        send_tx,
    ));

    // Cancelled by shutdown, by the reader when it stops, or by the writer
    // when it gives up on the socket
    let session = ctx.token.child_token();
    let mut writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        ctx.limits,
        session.clone(),
    ));

    let connections = ctx.registry.add_connection(Arc::clone(&connection));
    info!(
        conn_id = %id,
        ip = %admission.ip,
        identity = connection.identity().unwrap_or("-"),
        connections,
        "client connected"
    );
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);

    let exit = loop {
        let next = tokio::select! {
            biased;
            () = session.cancelled() => {
                if ctx.token.is_cancelled() {
                    break LoopExit::Cancelled;
                }
                break LoopExit::WriterStopped;
            }
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(conn_id = %id, error = %err, "socket receive failed");
                break LoopExit::ClientClosed;
            }
            None => break LoopExit::ClientClosed,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(ref t) => t.as_str(),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    s
                } else {
                    debug!(conn_id = %id, len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Close(_) => {
                debug!(conn_id = %id, "client sent close frame");
                break LoopExit::ClientClosed;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        debug!(conn_id = %id, len = text.len(), "frame received");

        let message = match parse_frame(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(conn_id = %id, error = %err, "unparseable client message");
                continue;
            }
        };

        if let Err(err) = ctx.handler.handle(&connection, &ctx.registry, message).await {
            error!(conn_id = %id, error = %err, "message handler failed");
            ctx.reporter.report(COMPONENT, "Processing Message", err);
            break LoopExit::HandlerFailed;
        }
    };

    // closing
    let _ = ctx.registry.remove_connection(&id);
    session.cancel();
    match tokio::time::timeout(WRITER_STOP_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.is_panic() => {
            error!(conn_id = %id, "writer task panicked");
            ctx.reporter.report(COMPONENT, "Removing Disconnected Client", err);
        }
        Ok(Err(_)) => {}
        Err(_) => writer.abort(),
    }

    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(
        conn_id = %id,
        ip = %admission.ip,
        connections = ctx.registry.count(),
        age = ?connection.age(),
        reason = ?exit,
        dropped = connection.drop_count(),
        "client disconnected"
    );
}

/// Forward queued frames to the socket and keep the connection alive.
///
/// Exits when the queue closes, a write fails, the client stops answering
/// pings, or `session` fires. Dropping the receiver on exit is what marks the
/// connection closed for the registry sweep and the dispatcher; cancelling
/// `session` on exit is what stops the reader.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    limits: SessionLimits,
    session: CancellationToken,
) {
    let _stop_reader = session.clone().drop_guard();
    let mut ping_interval = tokio::time::interval(limits.ping_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = session.cancelled() => {
                let _ = tokio::time::timeout(WRITER_STOP_TIMEOUT, sink.close()).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > limits.pong_timeout {
                    warn!(conn_id = %connection.id, timeout = ?limits.pong_timeout, "client unresponsive, disconnecting");
                    let _ = tokio::time::timeout(WRITER_STOP_TIMEOUT, sink.close()).await;
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(conn_id = %connection.id, "writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_from_settings() {
        let limits = SessionLimits::from(&ServerSettings::default());
        assert_eq!(limits.ping_interval, Duration::from_secs(30));
        assert_eq!(limits.pong_timeout, Duration::from_secs(60));
        assert_eq!(limits.outbound_capacity, 256);
    }

    #[test]
    fn limits_clamp_zero_values() {
        let settings = ServerSettings {
            ping_interval_secs: 0,
            outbound_queue_capacity: 0,
            ..ServerSettings::default()
        };
        let limits = SessionLimits::from(&settings);
        assert_eq!(limits.ping_interval, Duration::from_secs(1));
        assert_eq!(limits.outbound_capacity, 1);
    }

    #[test]
    fn default_limits_match_default_settings() {
        assert_eq!(SessionLimits::default(), SessionLimits::from(&ServerSettings::default()));
    }
}
