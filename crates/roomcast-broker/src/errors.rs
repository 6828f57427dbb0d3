//! Broker error types.

use thiserror::Error;

/// Errors raised while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An AMQP operation failed.
    #[error("amqp {stage} failed: {source}")]
    Amqp {
        /// The step that failed, e.g. `"declare exchange"`.
        stage: &'static str,
        /// Underlying client error.
        #[source]
        source: lapin::Error,
    },
    /// Could not reach the broker.
    #[error("broker connection failed: {0}")]
    Connect(String),
    /// The delivery stream failed or ended while consuming.
    #[error("delivery stream interrupted: {0}")]
    Stream(String),
    /// Every connection attempt failed.
    #[error("gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: Box<BrokerError>,
    },
    /// The distribution queue has no receiver left.
    #[error("distribution queue closed")]
    QueueClosed,
}

impl BrokerError {
    /// Map a `lapin` error, tagging the step it came from.
    pub fn amqp(stage: &'static str) -> impl FnOnce(lapin::Error) -> Self {
        move |source| Self::Amqp { stage, source }
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
