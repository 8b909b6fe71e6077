//! # Rollcall
//!
//! Realtime classroom attendance.
//!
//! A teacher opens an attendance window for one class meeting, students
//! check in by rotating QR code, by location, or are marked by hand, and
//! everyone watching the session sees stats move live. This crate puts
//! the [`AttendanceEngine`](rollcall_engine::AttendanceEngine) behind a
//! WebSocket gateway.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rollcall::prelude::*;
//!
//! # async fn run() -> Result<(), RollcallError> {
//! rollcall::init_tracing();
//!
//! let roster = InMemoryClassroom::new()
//!     .with_session("cs-1", "c-1")
//!     .with_students("c-1", ["s-1", "s-2"]);
//! let engine = Arc::new(AttendanceEngine::builder().classroom(Arc::new(roster)).build());
//! engine.start().await?;
//!
//! let server = RollcallServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(engine, DevAuthenticator)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod auth;
mod error;
mod handler;
mod server;

pub use auth::{AuthError, Authenticator, DevAuthenticator};
pub use error::RollcallError;
pub use server::{PROTOCOL_VERSION, RollcallServer, RollcallServerBuilder, ServerConfig};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Later calls are ignored, so tests and binaries may both call it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub mod prelude {
    pub use crate::{
        AuthError, Authenticator, DevAuthenticator, PROTOCOL_VERSION, RollcallError,
        RollcallServer, RollcallServerBuilder, ServerConfig,
    };
    pub use rollcall_engine::memory::{
        InMemoryClassroom, InMemoryRecordRepository, InMemorySessionRepository, LoggingEventSink,
    };
    pub use rollcall_engine::{
        AttendanceEngine, AttendanceEngineBuilder, AttendanceError, Classroom, EngineConfig,
        EventSink, OpenDefaults,
    };
    pub use rollcall_protocol::{
        AttendanceMethod, AttendanceRecord, AttendanceSession, AttendanceSessionId,
        AttendanceStatus, Caller, CheckinEvidence, ClassId, ClientEnvelope, ClientRequest,
        DeviceId, DeviceMeta, ErrorKind, OpenSessionRequest, ResponseBody, Role, ServerEnvelope,
        ServerMessage, SessionEvent, SessionRef, SessionStats, SessionStatus, StudentId, UserId,
    };
    pub use rollcall_tick::{Clock, ManualClock, SharedClock, SystemClock};
    pub use rollcall_token::{MemoryTokenStore, TokenStore};
}
