//! Error types for the device layer.

use rollcall_protocol::{DeviceId, ErrorKind, StudentId};

/// Errors that can occur while managing device registrations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No registration matches. For removal, this also covers a device
    /// that exists but belongs to someone else.
    #[error("device {0} not found")]
    NotFound(DeviceId),

    /// The device is already registered to a different student.
    #[error("device {0} is registered to another student")]
    BoundToAnotherStudent(DeviceId),

    /// The student already has the maximum number of active devices.
    #[error("student {student_id} already has {max} active devices")]
    LimitReached { student_id: StudentId, max: usize },
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BoundToAnotherStudent(_) | Self::LimitReached { .. } => ErrorKind::Conflict,
        }
    }
}
