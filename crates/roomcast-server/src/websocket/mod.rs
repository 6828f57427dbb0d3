//! WebSocket connection state, message handling and session lifecycle.

pub mod connection;
pub mod handler;
pub mod session;
