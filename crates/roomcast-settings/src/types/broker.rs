//! AMQP broker settings.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Everything but RFC 3986 unreserved characters.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Broker connection, topology and reconnect policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Virtual host.
    pub vhost: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Direct exchange to declare and bind to.
    pub exchange: String,
    /// Durable queue to declare and consume from.
    pub queue: String,
    /// Consumer tag sent with `basic.consume`.
    pub consumer_tag: String,
    /// Capacity of the queue between the consumer and the fanout dispatcher.
    pub distribution_queue_capacity: usize,
    /// Connection retry policy.
    pub retry: RetrySettings,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            exchange: "WS_EXCHANGE".to_string(),
            queue: "PUBLIC_WEBSOCKET_QUEUE".to_string(),
            consumer_tag: "roomcast".to_string(),
            distribution_queue_capacity: 1024,
            retry: RetrySettings::default(),
        }
    }
}

impl BrokerSettings {
    /// `amqp://` URI for the configured broker.
    ///
    /// Credentials and vhost are percent-encoded, so the root vhost `/`
    /// becomes `%2F`.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            encode(&self.username),
            encode(&self.password),
            self.host,
            self.port,
            encode(&self.vhost)
        )
    }

    /// Same as [`amqp_uri`](Self::amqp_uri) without the credentials, for logs.
    pub fn display_addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, encode(&self.vhost))
    }

    /// Routing key the queue is bound with: `route_to_<exchange>`.
    pub fn binding_key(&self) -> String {
        format!("route_to_{}", self.exchange)
    }
}

/// Fixed-delay bounded retry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Connection attempts before the consumer gives up and reports.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 5_000,
        }
    }
}
