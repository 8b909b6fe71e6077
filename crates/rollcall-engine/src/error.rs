//! Error types for the engine layer.

use rollcall_devices::DeviceError;
use rollcall_protocol::{
    AttendanceSessionId, DeviceId, ErrorKind, RecordId, SessionRef, SessionStatus, StudentId,
};
use rollcall_token::TokenError;

use crate::repository::StoreError;

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    // -- NotFound -----------------------------------------------------------
    /// The classroom collaborator does not know this session reference.
    #[error("class session {0} not found")]
    UnknownClassSession(SessionRef),

    #[error("attendance session {0} not found")]
    SessionNotFound(AttendanceSessionId),

    /// No seeded record for this student; they are not enrolled.
    #[error("no attendance record for student {student_id} in session {session_id}")]
    RecordNotFound {
        session_id: AttendanceSessionId,
        student_id: StudentId,
    },

    #[error("attendance record {0} not found")]
    RecordIdNotFound(RecordId),

    // -- Conflict -----------------------------------------------------------
    #[error("an attendance session is already open for {0}")]
    AlreadyOpen(SessionRef),

    /// Close or cancel on a session that already left OPEN.
    #[error("attendance session {0} is already {1}")]
    AlreadyFinished(AttendanceSessionId, SessionStatus),

    #[error("student {0} already checked in")]
    AlreadyCheckedIn(StudentId),

    // -- InvalidState -------------------------------------------------------
    #[error("attendance session {0} is not open")]
    NotOpen(AttendanceSessionId),

    #[error("check-in token is expired or invalid")]
    TokenRejected,

    #[error("check-in token belongs to another session")]
    TokenSessionMismatch,

    #[error("location is not a valid coordinate")]
    InvalidLocation,

    #[error("location is {distance_m:.0} m from the reference point, limit is {radius_m:.0} m")]
    OutOfRange { distance_m: f64, radius_m: f64 },

    #[error("device {0} is not registered to this student")]
    DeviceNotRegistered(DeviceId),

    #[error("invalid session options: {0}")]
    InvalidOptions(String),

    // -- Unavailable --------------------------------------------------------
    /// A collaborator call failed or timed out.
    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: String,
    },

    // -- Wrapped ------------------------------------------------------------
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl AttendanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownClassSession(_)
            | Self::SessionNotFound(_)
            | Self::RecordNotFound { .. }
            | Self::RecordIdNotFound(_) => ErrorKind::NotFound,

            Self::AlreadyOpen(_) | Self::AlreadyFinished(..) | Self::AlreadyCheckedIn(_) => {
                ErrorKind::Conflict
            }

            Self::NotOpen(_)
            | Self::TokenRejected
            | Self::TokenSessionMismatch
            | Self::InvalidLocation
            | Self::OutOfRange { .. }
            | Self::DeviceNotRegistered(_)
            | Self::InvalidOptions(_) => ErrorKind::InvalidState,

            Self::CollaboratorUnavailable { .. } | Self::Store(_) => ErrorKind::Unavailable,
            Self::Token(e) => e.kind(),
            Self::Device(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_conflicts() {
        assert_eq!(
            AttendanceError::AlreadyCheckedIn("s-1".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AttendanceError::AlreadyOpen("cs-1".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AttendanceError::AlreadyFinished(AttendanceSessionId::new(), SessionStatus::Closed)
                .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_kind_maps_rejected_checkins_to_invalid_state() {
        for err in [
            AttendanceError::NotOpen(AttendanceSessionId::new()),
            AttendanceError::TokenRejected,
            AttendanceError::TokenSessionMismatch,
            AttendanceError::DeviceNotRegistered("d-1".into()),
            AttendanceError::InvalidLocation,
            AttendanceError::OutOfRange { distance_m: 120.0, radius_m: 50.0 },
        ] {
            assert_eq!(err.kind(), ErrorKind::InvalidState, "{err}");
        }
    }

    #[test]
    fn test_kind_delegates_to_wrapped_device_error() {
        let err: AttendanceError = DeviceError::NotFound("d-9".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_out_of_range_message_rounds_distances() {
        let err = AttendanceError::OutOfRange { distance_m: 120.4, radius_m: 50.0 };
        assert_eq!(
            err.to_string(),
            "location is 120 m from the reference point, limit is 50 m"
        );
    }
}
