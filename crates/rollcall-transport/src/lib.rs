//! Transport abstraction layer for Rollcall.
//!
//! Provides the [`Transport`] and [`Connection`] traits the gateway is
//! written against, so realtime delivery is not tied to one socket
//! technology.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use rollcall_protocol::ConnectionId;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::net::SocketAddr;

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The address actually bound, useful after binding port 0.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

    /// Stops accepting new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that can send and receive frames.
///
/// `send` and `recv` may run concurrently from different tasks: a
/// gateway reads requests while it pushes events.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame. `Ok(None)` when the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
