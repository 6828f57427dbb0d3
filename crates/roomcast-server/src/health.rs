//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::registry::RoomRegistry;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the gateway is serving.
    pub status: &'static str,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Configured rooms.
    pub rooms: usize,
}

/// Snapshot the registry for a health response.
pub fn health_check(start_time: Instant, registry: &RoomRegistry) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.count(),
        rooms: registry.rooms().len(),
    }
}
