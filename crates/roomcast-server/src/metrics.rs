//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a global recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders nothing; used when metrics are disabled and in tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric names shared across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes refused by the auth pipeline (counter, label: reason).
pub const WS_HANDSHAKE_REJECTED_TOTAL: &str = "ws_handshake_rejected_total";
/// Frames queued to clients by the dispatcher (counter).
pub const FANOUT_FRAMES_SENT_TOTAL: &str = "fanout_frames_sent_total";
/// Frames dropped because a client queue was full (counter).
pub const FANOUT_FRAMES_DROPPED_TOTAL: &str = "fanout_frames_dropped_total";
/// Connections evicted during fanout or sweep (counter).
pub const CONNECTIONS_EVICTED_TOTAL: &str = "connections_evicted_total";
