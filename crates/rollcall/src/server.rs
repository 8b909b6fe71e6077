//! `RollcallServer` builder and accept loop.
//!
//! This is the entry point for running the attendance gateway. It ties
//! together transport → protocol → engine: every accepted WebSocket gets a
//! handler task that authenticates the caller and then turns requests into
//! engine calls and subscribed events into pushed frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rollcall_engine::AttendanceEngine;
use rollcall_protocol::{Codec, JsonCodec};
use rollcall_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{Authenticator, RollcallError};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How long a new connection may take to send its handshake.
    pub handshake_timeout: Duration,
    /// A connection with no traffic in either direction for this long is
    /// dropped. Inbound frames and pushed events both count, so a
    /// subscriber receiving live updates stays connected without
    /// heartbeats.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Shared state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) engine: Arc<AttendanceEngine>,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    pub(crate) started: Instant,
}

impl<A: Authenticator, C: Codec> ServerState<A, C> {
    /// Milliseconds since the server started; the `timestamp` of every
    /// outgoing envelope.
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Builder for configuring and starting a Rollcall server.
///
/// # Example
///
/// ```rust,ignore
/// use rollcall::prelude::*;
///
/// let engine = Arc::new(AttendanceEngine::builder().classroom(roster).build());
/// engine.start().await?;
/// let server = RollcallServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(engine, DevAuthenticator)
///     .await?;
/// server.run().await
/// ```
pub struct RollcallServerBuilder {
    config: ServerConfig,
}

impl RollcallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces every gateway setting at once.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Binds the socket. The server speaks JSON over WebSocket.
    pub async fn build<A: Authenticator>(
        self,
        engine: Arc<AttendanceEngine>,
        auth: A,
    ) -> Result<RollcallServer<A, JsonCodec>, RollcallError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            engine,
            auth,
            codec: JsonCodec,
            config: self.config,
            started: Instant::now(),
        });

        Ok(RollcallServer { transport, state })
    }
}

impl Default for RollcallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Rollcall gateway.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RollcallServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl<A, C> RollcallServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    /// Creates a new builder.
    pub fn builder() -> RollcallServerBuilder {
        RollcallServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, RollcallError> {
        Ok(self.transport.local_addr()?)
    }

    pub fn engine(&self) -> &Arc<AttendanceEngine> {
        &self.state.engine
    }

    /// Runs the accept loop.
    ///
    /// Each accepted connection is handled on its own task. Runs until
    /// the process is terminated; a failed accept is logged and skipped.
    pub async fn run(mut self) -> Result<(), RollcallError> {
        tracing::info!("Rollcall gateway running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
