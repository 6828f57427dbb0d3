//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may contain any subset of fields; missing ones keep their default.

mod broker;
mod server;

pub use broker::*;
pub use server::*;

use std::path::PathBuf;

use roomcast_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the gateway.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 9001, "forwardingEnabled": true },
///   "broker": { "host": "rabbitmq", "exchange": "WS_EXCHANGE" },
///   "rooms": ["room-1", "room-2"]
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// WebSocket listener settings.
    pub server: ServerSettings,
    /// AMQP broker connection and topology.
    pub broker: BrokerSettings,
    /// The fixed set of room names clients may subscribe to.
    pub rooms: Vec<String>,
    /// Task supervision timings.
    pub supervisor: SupervisorSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            rooms: (1..=4).map(|n| format!("room-{n}")).collect(),
            supervisor: SupervisorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewaySettings {
    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rooms.is_empty() {
            return Err(SettingsError::InvalidValue("rooms must not be empty".into()));
        }
        if self.rooms.iter().any(String::is_empty) {
            return Err(SettingsError::InvalidValue("room names must not be empty".into()));
        }
        if self.broker.exchange.is_empty() || self.broker.queue.is_empty() {
            return Err(SettingsError::InvalidValue(
                "broker exchange and queue names are required".into(),
            ));
        }
        if self.broker.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.server.outbound_queue_capacity == 0 || self.broker.distribution_queue_capacity == 0
        {
            return Err(SettingsError::InvalidValue("queue capacities must be non-zero".into()));
        }
        Ok(())
    }
}

/// Supervisor timings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Interval between liveness sweeps of the connection registry.
    pub sweep_interval_ms: u64,
    /// How long to wait after the first fatal report for sibling reports.
    pub error_grace_ms: u64,
    /// Upper bound on waiting for tasks to finish their cleanup.
    pub shutdown_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 5_000,
            error_grace_ms: 2_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// File that receives a copy of every log line, if set.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rooms() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.rooms, vec!["room-1", "room-2", "room-3", "room-4"]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: GatewaySettings =
            serde_json::from_str(r#"{"server": {"port": 7000}}"#).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.supervisor.error_grace_ms, 2_000);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(GatewaySettings::default()).unwrap();
        assert!(json["supervisor"].get("sweepIntervalMs").is_some());
        assert!(json["server"].get("forwardingEnabled").is_some());
        assert!(json["broker"]["retry"].get("maxAttempts").is_some());
    }

    #[test]
    fn validate_rejects_empty_rooms() {
        let settings = GatewaySettings {
            rooms: vec![],
            ..GatewaySettings::default()
        };
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut settings = GatewaySettings::default();
        settings.broker.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut settings = GatewaySettings::default();
        settings.server.outbound_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn logging_defaults() {
        let logging = LoggingSettings::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, LogFormat::Compact);
        assert!(logging.file.is_none());
    }

    #[test]
    fn logging_file_from_json() {
        let settings: GatewaySettings =
            serde_json::from_str(r#"{"logging": {"file": "/var/log/roomcast/gateway.log"}}"#).unwrap();
        assert_eq!(
            settings.logging.file,
            Some(PathBuf::from("/var/log/roomcast/gateway.log"))
        );
        assert_eq!(settings.logging.level, "info");
    }
}
