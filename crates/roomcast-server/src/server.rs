//! Axum router: WebSocket upgrade with the handshake checks, `/health` and
//! `/metrics`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Query, Request, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{AUTHORIZATION_QUERY, AuthConfig, authenticate};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_HANDSHAKE_REJECTED_TOTAL;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handshake checks.
    pub auth: Arc<AuthConfig>,
    /// Handed to every admitted session.
    pub session: SessionContext,
    /// When the gateway started.
    pub start_time: Instant,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve `router` on `listener` until `token` is cancelled.
///
/// Cancellation stops accepting and closes the listening socket. Upgraded
/// sessions are not covered by the graceful shutdown: they watch the same
/// token, and the supervisor waits for them through the session tracker.
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!(%addr, "listener closed");
    Ok(())
}

/// GET /ws
///
/// The handshake checks run before the upgrade is accepted; a rejected
/// client never reaches the registry.
async fn ws_handler(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .unwrap_or_default();
    let query_token = query.get(AUTHORIZATION_QUERY).map(String::as_str);

    let admission = match authenticate(&state.auth, &parts.headers, query_token, peer) {
        Ok(admission) => admission,
        Err(rejection) => {
            warn!(peer = ?peer, reason = %rejection, "handshake rejected");
            counter!(WS_HANDSHAKE_REJECTED_TOTAL, "reason" => format!("{rejection:?}")).increment(1);
            return rejection.into_response();
        }
    };

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = state.session.clone();
    let tracker = ctx.tracker.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| tracker.track_future(run_ws_session(socket, admission, ctx)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.session.registry))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
