//! # roomcast-broker
//!
//! The inbound side of the gateway. A [`BrokerConsumer`] keeps one logical
//! channel open to the message broker, decodes each delivery through a
//! [`MessageDecoder`] and pushes the result onto the distribution queue,
//! acknowledging only after the push succeeded.
//!
//! The transport is behind the [`BrokerConnector`] / [`BrokerSession`] seam;
//! [`LapinConnector`] is the AMQP implementation.

#![deny(unsafe_code)]

pub mod amqp;
pub mod consumer;
pub mod decoder;
pub mod errors;
pub mod session;

pub use amqp::LapinConnector;
pub use consumer::{BrokerConsumer, RetryPolicy};
pub use decoder::{DecodeError, JsonDecoder, MessageDecoder};
pub use errors::{BrokerError, Result};
pub use session::{BrokerConnector, BrokerSession, Delivery, Topology};
