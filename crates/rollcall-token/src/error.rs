//! Error types for the token layer.

use rollcall_protocol::ErrorKind;

/// Errors raised while talking to the token store.
///
/// An invalid or expired token is *not* an error: validation answers
/// `Ok(None)` and the caller decides what that means.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The backing store failed or could not be reached.
    #[error("token store unavailable: {0}")]
    Store(String),

    /// A stored entry could not be decoded.
    #[error("corrupt token entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) => ErrorKind::Unavailable,
            Self::Corrupt(_) => ErrorKind::Internal,
        }
    }
}
