//! # roomcast-server
//!
//! Everything between the distribution queue and the client sockets.
//!
//! - [`registry`]: room membership and connection lookup under one lock
//! - [`auth`] and [`websocket`]: handshake checks and the per-connection session
//! - [`dispatcher`]: broker message fanout with per-recipient failure isolation
//! - [`sweep`]: periodic eviction of dead connections
//! - [`supervisor`]: task ownership, error aggregation and shutdown
//! - [`rooms`]: the public room service (subscribe/unsubscribe, `test update`)
//! - [`gateway`]: wiring from settings

#![deny(unsafe_code)]

pub mod auth;
pub mod dispatcher;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod supervisor;
pub mod sweep;
pub mod websocket;

pub use auth::{Admission, AuthConfig, AuthRejection};
pub use dispatcher::{DispatchOutcome, FanoutDispatcher, FanoutError, FanoutTransform, Routed};
pub use gateway::{Gateway, RunningGateway};
pub use registry::RoomRegistry;
pub use rooms::{PublicUpdateTransform, RoomCommandHandler};
pub use supervisor::{ShutdownSummary, ShutdownTrigger, Supervisor};
pub use websocket::connection::ClientConnection;
pub use websocket::handler::{HandlerError, MessageHandler};
