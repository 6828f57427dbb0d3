//! Transport seam between the consumer policy and the broker client.

use async_trait::async_trait;
use roomcast_settings::BrokerSettings;

use crate::errors::Result;

/// One message taken off the queue, not yet acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag used to ack or reject.
    pub delivery_tag: u64,
    /// Raw message body.
    pub body: Vec<u8>,
}

/// Names declared and bound when a session opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    /// Durable direct exchange.
    pub exchange: String,
    /// Durable queue consumed from.
    pub queue: String,
    /// Routing key binding the queue to the exchange.
    pub binding_key: String,
    /// Consumer tag.
    pub consumer_tag: String,
}

impl Topology {
    /// Build from broker settings.
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            exchange: settings.exchange.clone(),
            queue: settings.queue.clone(),
            binding_key: settings.binding_key(),
            consumer_tag: settings.consumer_tag.clone(),
        }
    }
}

/// Opens consuming sessions.
///
/// `connect` either returns a session that is already consuming, or an
/// error after releasing anything it opened along the way.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Connect, declare the topology and start consuming.
    async fn connect(&self, topology: &Topology) -> Result<Box<dyn BrokerSession>>;
}

/// A live consuming session.
#[async_trait]
pub trait BrokerSession: Send {
    /// Next delivery. `None` when the broker ended the stream.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;

    /// Positively acknowledge a delivery.
    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;

    /// Reject a delivery, optionally asking the broker to requeue it.
    async fn reject(&mut self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Close the channel and the connection. Errors are logged, not returned.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_from_default_settings() {
        let topology = Topology::from_settings(&BrokerSettings::default());
        assert_eq!(topology.exchange, "WS_EXCHANGE");
        assert_eq!(topology.queue, "PUBLIC_WEBSOCKET_QUEUE");
        assert_eq!(topology.binding_key, "route_to_WS_EXCHANGE");
        assert_eq!(topology.consumer_tag, "roomcast");
    }

    #[test]
    fn binding_key_follows_exchange() {
        let settings = BrokerSettings {
            exchange: "FEEDS".into(),
            ..BrokerSettings::default()
        };
        assert_eq!(Topology::from_settings(&settings).binding_key, "route_to_FEEDS");
    }
}
