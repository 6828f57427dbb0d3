//! # roomcast-core
//!
//! Shared vocabulary for the roomcast gateway crates:
//!
//! - **Branded IDs**: [`ConnectionId`] newtype over a UUID v7 string
//! - **Wire shapes**: [`OutboundEnvelope`] (server → client frame) and
//!   [`DistributionMessage`] (broker → dispatcher queue item)
//! - **Error channel**: [`ErrorReport`], [`ErrorReporter`] and [`ReportReceiver`],
//!   the in-process queue every component reports fatal errors on
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::{DistributionMessage, OutboundEnvelope};
pub use errors::{BoxError, ErrorReport, ErrorReporter, ReportReceiver, error_channel};
pub use ids::ConnectionId;
