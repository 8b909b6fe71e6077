//! Request and response shapes spoken over the gateway.
//!
//! Every frame is an envelope. Clients send [`ClientEnvelope`]s carrying a
//! `seq` they pick; the server answers with a [`ServerEnvelope`] whose
//! `in_reply_to` echoes it, so a client can match replies to requests even
//! when events are interleaved between them.
//!
//! ```text
//! client → {"seq":4,"request":{"op":"get_stats","attendance_session_id":"…"}}
//! server ← {"seq":17,"timestamp":…,"in_reply_to":4,
//!           "message":{"type":"response","body":{"kind":"stats","data":{…}}}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::events::SessionEvent;
use crate::types::{
    AttendanceMethod, AttendanceRecord, AttendanceSession, AttendanceSessionId, AttendanceStatus,
    ClassId, Coordinates, DeviceId, DeviceMeta, DeviceRegistration, GeoFence, QrPayload, RecordId,
    Role, SessionRef, SessionStats, StudentId, TokenBinding, UserId,
};

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// One client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Picked by the client; echoed back as `in_reply_to`.
    pub seq: u64,
    pub request: ClientRequest,
}

/// Options for opening an attendance window. Omitted fields take the
/// engine's configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub session_ref: SessionRef,
    pub method: AttendanceMethod,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub late_threshold_minutes: Option<u32>,
    #[serde(default)]
    pub rotation_seconds: Option<u32>,
    #[serde(default)]
    pub geofence: Option<GeoFence>,
}

impl OpenSessionRequest {
    /// A request using every default.
    pub fn new(session_ref: impl Into<SessionRef>, method: AttendanceMethod) -> Self {
        Self {
            session_ref: session_ref.into(),
            method,
            duration_minutes: None,
            late_threshold_minutes: None,
            rotation_seconds: None,
            geofence: None,
        }
    }
}

/// What a student presents when checking in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckinEvidence {
    #[serde(default)]
    pub qr_token: Option<String>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl CheckinEvidence {
    /// Both coordinates, if the client sent both.
    pub fn location(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

/// Everything a client can ask for.
///
/// Internally tagged by `op`. Staff-only operations are rejected by the
/// gateway for student callers; self-service operations (`checkin`,
/// `register_device`) act on the caller's own student id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientRequest {
    // -- Connection lifecycle --
    Handshake {
        version: u32,
        token: Option<String>,
    },
    Heartbeat {
        client_time: u64,
    },
    Disconnect {
        reason: String,
    },

    // -- Sessions (staff) --
    OpenSession(OpenSessionRequest),
    CloseSession {
        attendance_session_id: AttendanceSessionId,
    },
    CancelSession {
        attendance_session_id: AttendanceSessionId,
    },
    GetSession {
        attendance_session_id: AttendanceSessionId,
    },
    GetOpenSessionForClass {
        class_id: ClassId,
    },
    GetQr {
        attendance_session_id: AttendanceSessionId,
    },
    ValidateToken {
        token: String,
    },
    GetStats {
        attendance_session_id: AttendanceSessionId,
    },
    ListRecords {
        attendance_session_id: AttendanceSessionId,
    },
    /// Staff may name any student; students always see their own.
    StudentRecords {
        #[serde(default)]
        student_id: Option<StudentId>,
        #[serde(default)]
        class_id: Option<ClassId>,
    },
    ManualCheckin {
        attendance_session_id: AttendanceSessionId,
        student_id: StudentId,
        #[serde(default)]
        note: Option<String>,
    },
    UpdateRecordStatus {
        record_id: RecordId,
        status: AttendanceStatus,
        #[serde(default)]
        note: Option<String>,
    },

    // -- Check-in (student) --
    Checkin {
        attendance_session_id: AttendanceSessionId,
        evidence: CheckinEvidence,
    },

    // -- Devices --
    RegisterDevice {
        device_id: DeviceId,
        #[serde(default)]
        meta: DeviceMeta,
    },
    /// Staff may name any student; students always see their own.
    ListDevices {
        #[serde(default)]
        student_id: Option<StudentId>,
    },
    BlockDevice {
        device_id: DeviceId,
    },
    UnblockDevice {
        device_id: DeviceId,
    },
    /// Scoped to the caller's own devices unless a staff caller names a
    /// student.
    RemoveDevice {
        device_id: DeviceId,
        #[serde(default)]
        student_id: Option<StudentId>,
    },

    // -- Realtime --
    Subscribe {
        attendance_session_id: AttendanceSessionId,
    },
    Unsubscribe {
        attendance_session_id: AttendanceSessionId,
    },
}

impl ClientRequest {
    /// Short name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Disconnect { .. } => "disconnect",
            Self::OpenSession(_) => "open_session",
            Self::CloseSession { .. } => "close_session",
            Self::CancelSession { .. } => "cancel_session",
            Self::GetSession { .. } => "get_session",
            Self::GetOpenSessionForClass { .. } => "get_open_session_for_class",
            Self::GetQr { .. } => "get_qr",
            Self::ValidateToken { .. } => "validate_token",
            Self::GetStats { .. } => "get_stats",
            Self::ListRecords { .. } => "list_records",
            Self::StudentRecords { .. } => "student_records",
            Self::ManualCheckin { .. } => "manual_checkin",
            Self::UpdateRecordStatus { .. } => "update_record_status",
            Self::Checkin { .. } => "checkin",
            Self::RegisterDevice { .. } => "register_device",
            Self::ListDevices { .. } => "list_devices",
            Self::BlockDevice { .. } => "block_device",
            Self::UnblockDevice { .. } => "unblock_device",
            Self::RemoveDevice { .. } => "remove_device",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Operations only teachers and admins may perform.
    pub fn requires_staff(&self) -> bool {
        matches!(
            self,
            Self::OpenSession(_)
                | Self::CloseSession { .. }
                | Self::CancelSession { .. }
                | Self::GetQr { .. }
                | Self::ListRecords { .. }
                | Self::ManualCheckin { .. }
                | Self::UpdateRecordStatus { .. }
                | Self::BlockDevice { .. }
                | Self::UnblockDevice { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// One server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Per-connection counter, starting at 1.
    pub seq: u64,
    /// Milliseconds since the server started.
    pub timestamp: u64,
    /// The client `seq` this frame answers. `None` for pushed events.
    #[serde(default)]
    pub in_reply_to: Option<u64>,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    HandshakeAck {
        user_id: UserId,
        role: Role,
        server_time: DateTime<Utc>,
    },
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },
    Response {
        body: ResponseBody,
    },
    /// A realtime event for a session this connection subscribed to.
    Event {
        event: SessionEvent,
    },
    Error {
        code: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    /// Builds an error frame from a kind and message.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            code: kind.code(),
            kind,
            message: message.into(),
        }
    }
}

/// The payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    Session(AttendanceSession),
    MaybeSession(Option<AttendanceSession>),
    Qr(Option<QrPayload>),
    TokenValidation(Option<TokenBinding>),
    Stats(SessionStats),
    Record(AttendanceRecord),
    Records(Vec<AttendanceRecord>),
    Device(DeviceRegistration),
    Devices(Vec<DeviceRegistration>),
    Subscribed(AttendanceSessionId),
    Unsubscribed(AttendanceSessionId),
    Ack,
}

// =========================================================================
// Tests
// =========================================================================
