//! Events leaving the engine.
//!
//! Two audiences, two types:
//!
//! - [`SessionEvent`] goes to realtime subscribers of one attendance
//!   session (the teacher's display, students' phones).
//! - [`DomainEvent`] goes to downstream collaborators (notifications,
//!   reporting) through the engine's event sink.
//!
//! [`LeaveRequestApproved`] flows the other way: it is consumed by the
//! engine to mark students excused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AttendanceMethod, AttendanceSessionId, AttendanceStatus, CheckinSource, ClassId, SessionRef,
    SessionStats, SessionStatus, StudentId, UserId,
};

/// A realtime notification scoped to one attendance session.
///
/// Serialized with an `event` tag:
///
/// ```json
/// {"event":"qr_updated","attendance_session_id":"…","token":"…","timestamp":"…"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new token is live; displays should redraw the QR code.
    QrUpdated {
        attendance_session_id: AttendanceSessionId,
        token: String,
        timestamp: DateTime<Utc>,
    },
    StudentCheckedIn {
        attendance_session_id: AttendanceSessionId,
        student_id: StudentId,
        status: AttendanceStatus,
        checkin_time: DateTime<Utc>,
        source: CheckinSource,
    },
    /// The window ended, either at its deadline, by hand, or cancelled.
    SessionClosed {
        attendance_session_id: AttendanceSessionId,
        status: SessionStatus,
        closed_at: DateTime<Utc>,
    },
    StatsUpdated {
        attendance_session_id: AttendanceSessionId,
        stats: SessionStats,
    },
}

impl SessionEvent {
    /// The session this event belongs to, used to route it to subscribers.
    pub fn session_id(&self) -> AttendanceSessionId {
        match self {
            Self::QrUpdated { attendance_session_id, .. }
            | Self::StudentCheckedIn { attendance_session_id, .. }
            | Self::SessionClosed { attendance_session_id, .. }
            | Self::StatsUpdated { attendance_session_id, .. } => *attendance_session_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrUpdated { .. } => "qr_updated",
            Self::StudentCheckedIn { .. } => "student_checked_in",
            Self::SessionClosed { .. } => "session_closed",
            Self::StatsUpdated { .. } => "stats_updated",
        }
    }
}

/// A fact published to downstream collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum DomainEvent {
    AttendanceSessionOpened {
        attendance_session_id: AttendanceSessionId,
        session_ref: SessionRef,
        class_id: ClassId,
        teacher_id: UserId,
        method: AttendanceMethod,
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
    },
    AttendanceCheckedIn {
        attendance_session_id: AttendanceSessionId,
        session_ref: SessionRef,
        class_id: ClassId,
        student_id: StudentId,
        status: AttendanceStatus,
        checkin_time: DateTime<Utc>,
        source: CheckinSource,
    },
    AttendanceSessionClosed {
        attendance_session_id: AttendanceSessionId,
        session_ref: SessionRef,
        class_id: ClassId,
        status: SessionStatus,
        totals: SessionStats,
        closed_at: DateTime<Utc>,
    },
    /// One per record moved to EXCUSED.
    AttendanceExcusedUpdated {
        session_ref: SessionRef,
        student_id: StudentId,
        leave_request_id: String,
        updated_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The routing key downstream consumers subscribe to. Same spelling as
    /// the serialized `pattern` tag.
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::AttendanceSessionOpened { .. } => "attendance_session_opened",
            Self::AttendanceCheckedIn { .. } => "attendance_checked_in",
            Self::AttendanceSessionClosed { .. } => "attendance_session_closed",
            Self::AttendanceExcusedUpdated { .. } => "attendance_excused_updated",
        }
    }
}

/// An approved leave request, consumed to mark the student excused.
///
/// `session_ids` are class-meeting references, not attendance session ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequestApproved {
    pub leave_request_id: String,
    pub student_id: StudentId,
    pub session_ids: Vec<SessionRef>,
}
