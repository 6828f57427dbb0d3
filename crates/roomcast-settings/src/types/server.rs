//! WebSocket listener settings.

use serde::{Deserialize, Serialize};

/// WebSocket server network and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Take the client IP from `X-Forwarded-For` instead of the peer address.
    /// Only enable behind a trusted proxy.
    pub forwarding_enabled: bool,
    /// Interval between server-initiated Ping frames.
    pub ping_interval_secs: u64,
    /// Close a connection that has not answered a Ping for this long.
    pub pong_timeout_secs: u64,
    /// Frames buffered per connection before new frames are dropped.
    pub outbound_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9001,
            forwarding_enabled: false,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
