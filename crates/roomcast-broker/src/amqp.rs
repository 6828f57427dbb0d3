//! AMQP implementation of the broker seam, backed by `lapin`.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicRejectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use roomcast_settings::BrokerSettings;
use tracing::{debug, info, warn};

use crate::errors::{BrokerError, Result};
use crate::session::{BrokerConnector, BrokerSession, Delivery, Topology};

const REPLY_SUCCESS: u16 = 200;

/// Connects to an AMQP 0.9.1 broker.
#[derive(Clone)]
pub struct LapinConnector {
    uri: String,
    display_addr: String,
}

impl LapinConnector {
    /// Build from broker settings.
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            uri: settings.amqp_uri(),
            display_addr: settings.display_addr(),
        }
    }
}

impl std::fmt::Debug for LapinConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LapinConnector")
            .field("addr", &self.display_addr)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(&self, topology: &Topology) -> Result<Box<dyn BrokerSession>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|err| BrokerError::Connect(format!("{}: {err}", self.display_addr)))?;

        match open_consumer(&connection, topology).await {
            Ok((channel, consumer)) => {
                info!(
                    addr = %self.display_addr,
                    exchange = %topology.exchange,
                    queue = %topology.queue,
                    "consuming from broker"
                );
                Ok(Box::new(LapinSession {
                    connection,
                    channel,
                    consumer,
                }))
            }
            Err(err) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "OK").await {
                    debug!(error = %close_err, "closing half-open connection failed");
                }
                Err(err)
            }
        }
    }
}

async fn open_consumer(connection: &Connection, topology: &Topology) -> Result<(Channel, Consumer)> {
    let channel = connection
        .create_channel()
        .await
        .map_err(BrokerError::amqp("open channel"))?;

    channel
        .exchange_declare(
            &topology.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::amqp("declare exchange"))?;

    let _queue = channel
        .queue_declare(
            &topology.queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::amqp("declare queue"))?;

    channel
        .queue_bind(
            &topology.queue,
            &topology.exchange,
            &topology.binding_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::amqp("bind queue"))?;

    let consumer = channel
        .basic_consume(
            &topology.queue,
            &topology.consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::amqp("consume"))?;

    Ok((channel, consumer))
}

struct LapinSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl BrokerSession for LapinSession {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let next = self.consumer.next().await?;
        Some(
            next.map(|delivery| Delivery {
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
            })
            .map_err(BrokerError::amqp("receive")),
        )
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(BrokerError::amqp("ack"))
    }

    async fn reject(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(BrokerError::amqp("reject"))
    }

    async fn close(&mut self) {
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %err, "closing broker channel failed");
        }
        if let Err(err) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %err, "closing broker connection failed");
        }
        debug!("broker session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_credentials() {
        let settings = BrokerSettings {
            password: "s3cret".into(),
            ..BrokerSettings::default()
        };
        let connector = LapinConnector::new(&settings);
        let rendered = format!("{connector:?}");
        assert!(rendered.contains("localhost:5672"));
        assert!(!rendered.contains("s3cret"));
    }

    #[tokio::test]
    async fn unreachable_broker_is_connect_error() {
        let settings = BrokerSettings {
            host: "127.0.0.1".into(),
            port: 1,
            ..BrokerSettings::default()
        };
        let connector = LapinConnector::new(&settings);
        let topology = Topology::from_settings(&settings);
        match connector.connect(&topology).await {
            Err(BrokerError::Connect(reason)) => assert!(reason.starts_with("127.0.0.1:1/"), "{reason}"),
            Err(other) => panic!("expected connect error, got {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
