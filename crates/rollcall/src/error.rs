//! Unified error type for the Rollcall service.

use rollcall_engine::AttendanceError;
use rollcall_protocol::{ErrorKind, ProtocolError};
use rollcall_transport::TransportError;

use crate::AuthError;

/// Top-level error that wraps every layer's error.
///
/// `#[from]` on each variant lets `?` lift sub-crate errors without
/// explicit mapping.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, out-of-order message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An attendance operation failed.
    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    /// The handshake token was rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RollcallError {
    /// The caller-facing category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Attendance(e) => e.kind(),
            Self::Auth(_) => ErrorKind::Unauthorized,
            Self::Protocol(_) => ErrorKind::InvalidState,
            Self::Transport(_) => ErrorKind::Unavailable,
        }
    }
}
