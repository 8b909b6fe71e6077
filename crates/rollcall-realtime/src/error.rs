//! Error types for the realtime layer.

use rollcall_protocol::ErrorKind;

/// Errors that can occur when talking to the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// The notifier task has stopped (shut down or panicked).
    #[error("notifier is not running")]
    Unavailable,
}

impl NotifierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable => ErrorKind::Unavailable,
        }
    }
}
