//! Error types for the protocol layer, plus the taxonomy shared by every
//! other layer.

use serde::{Deserialize, Serialize};

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown `op`, missing fields.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but breaks a protocol rule, e.g. a
    /// request arriving before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// The coarse category of a failure, as seen by a caller.
///
/// Every crate-specific error maps onto one of these so the gateway can
/// answer with a stable code regardless of which layer failed:
///
/// | Kind | Code | Caller should |
/// |------|------|---------------|
/// | `NotFound` | 404 | stop, the thing does not exist |
/// | `Conflict` | 409 | change the request |
/// | `InvalidState` | 400 | stop, the target is in the wrong state |
/// | `Unauthorized` | 401 | present valid credentials |
/// | `Forbidden` | 403 | stop, the caller's role may not do this |
/// | `Unavailable` | 503 | retry later |
/// | `Internal` | 500 | report it |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    Unauthorized,
    Forbidden,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::InvalidState => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidState => "invalid_state",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
