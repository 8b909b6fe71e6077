//! Core domain types shared by every Rollcall layer.
//!
//! Identifiers are newtypes so a `StudentId` can never be passed where a
//! `DeviceId` is expected, even though both are strings underneath. They
//! serialize transparently (`"s-42"`, not `{"0":"s-42"}`).

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of one attendance window. Generated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendanceSessionId(pub Uuid);

impl AttendanceSessionId {
    /// Creates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttendanceSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttendanceSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one device registration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Declares a string-backed identifier owned by some other system
/// (classroom service, identity provider, the student's phone).
macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrows the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

external_id!(
    /// Reference to a class meeting in the classroom service.
    SessionRef
);
external_id!(
    /// A class (course section) in the classroom service.
    ClassId
);
external_id!(
    /// A student, as known to the identity provider.
    StudentId
);
external_id!(
    /// Any authenticated user (teacher, admin, student).
    UserId
);
external_id!(
    /// A physical device identifier reported by the client app.
    DeviceId
);

/// Opaque identifier for a realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Callers
// ---------------------------------------------------------------------------

/// What a verified caller is allowed to act as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Teachers and admins may run attendance windows and override records.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Teacher | Self::Admin)
    }
}

/// A verified identity, produced by whatever authenticates connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    /// The caller viewed as a student (self-service operations).
    pub fn as_student(&self) -> StudentId {
        StudentId(self.user_id.0.clone())
    }
}

// ---------------------------------------------------------------------------
// AttendanceSession
// ---------------------------------------------------------------------------

/// How students prove presence for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceMethod {
    /// Scan a rotating QR code shown in the room.
    Qr,
    /// The teacher marks students by hand.
    Manual,
    /// The phone reports its location.
    Gps,
}

impl fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Qr => "QR",
            Self::Manual => "MANUAL",
            Self::Gps => "GPS",
        })
    }
}

/// Lifecycle of an attendance session.
///
/// ```text
///   Open ──(close)──→ Closed      (terminal)
///     │
///     └──(cancel)──→ Cancelled    (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Closed,
    Cancelled,
}

impl SessionStatus {
    /// Returns `true` if no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::Closed) | (Self::Open, Self::Cancelled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    /// Latitude within ±90 and longitude within ±180. NaN is never valid.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle (haversine) distance to `other`, in metres.
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// The reference point a GPS check-in is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    pub center: Coordinates,
    pub radius_m: f64,
}

/// One time-boxed check-in window for one class meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: AttendanceSessionId,
    /// The class meeting in the classroom service this window belongs to.
    pub session_ref: SessionRef,
    pub class_id: ClassId,
    /// Teacher who opened the window.
    pub opened_by: UserId,
    pub method: AttendanceMethod,
    /// The token currently displayed as a QR code (QR sessions only).
    pub current_token: Option<String>,
    pub rotation_secs: u32,
    pub open_time: DateTime<Utc>,
    /// Deadline while open; actual close time once closed.
    pub close_time: DateTime<Utc>,
    pub late_threshold_mins: u32,
    pub geofence: Option<GeoFence>,
    pub status: SessionStatus,
}

impl AttendanceSession {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    /// A check-in at `at` counts as late when more than
    /// `late_threshold_mins` have elapsed since the window opened.
    pub fn is_late_at(&self, at: DateTime<Utc>) -> bool {
        at - self.open_time > TimeDelta::minutes(i64::from(self.late_threshold_mins))
    }

    /// Whether the auto-close deadline has been reached.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }
}

// ---------------------------------------------------------------------------
// AttendanceRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl AttendanceStatus {
    /// PRESENT and LATE are the outcomes of a successful check-in.
    pub fn is_checked_in(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Present => "present",
            Self::Late => "late",
            Self::Absent => "absent",
            Self::Excused => "excused",
        })
    }
}

/// Where an attendance outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckinSource {
    Qr,
    Manual,
    Gps,
    /// Seeded by the engine when the session opened.
    System,
}

impl fmt::Display for CheckinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Qr => "qr",
            Self::Manual => "manual",
            Self::Gps => "gps",
            Self::System => "system",
        })
    }
}

/// The attendance outcome of one student for one session.
///
/// Unique per `(attendance_session_id, student_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub attendance_session_id: AttendanceSessionId,
    pub session_ref: SessionRef,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub checkin_time: Option<DateTime<Utc>>,
    pub source: CheckinSource,
    pub note: Option<String>,
    pub device_id: Option<DeviceId>,
    pub location: Option<Coordinates>,
    pub distance_to_reference_m: Option<f64>,
    /// Staff member who marked the record by hand, if any.
    pub marked_by: Option<UserId>,
}

impl AttendanceRecord {
    /// The ABSENT/SYSTEM row seeded for every enrolled student at open.
    pub fn absent(session: &AttendanceSession, student_id: StudentId) -> Self {
        Self {
            id: RecordId::new(),
            attendance_session_id: session.id,
            session_ref: session.session_ref.clone(),
            student_id,
            status: AttendanceStatus::Absent,
            checkin_time: None,
            source: CheckinSource::System,
            note: None,
            device_id: None,
            location: None,
            distance_to_reference_m: None,
            marked_by: None,
        }
    }
}

/// Head counts for one session, derived from its records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused: usize,
}

impl SessionStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.status {
                AttendanceStatus::Present => stats.present += 1,
                AttendanceStatus::Late => stats.late += 1,
                AttendanceStatus::Absent => stats.absent += 1,
                AttendanceStatus::Excused => stats.excused += 1,
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Active,
    Blocked,
}

/// Self-reported description of a device, stored for staff reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
}

/// Binds one physical device to one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub id: RegistrationId,
    pub student_id: StudentId,
    pub device_id: DeviceId,
    pub meta: DeviceMeta,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
}

impl DeviceRegistration {
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }
}

// ---------------------------------------------------------------------------
// QR payloads
// ---------------------------------------------------------------------------

/// What a token resolves to: the session it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    pub attendance_session_id: AttendanceSessionId,
    pub class_id: ClassId,
    pub session_ref: SessionRef,
}

/// Everything a display needs to render the current QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub token: String,
    /// The URL encoded into the QR image.
    pub checkin_url: String,
    pub expires_in_secs: u32,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session_opened_at(open_time: DateTime<Utc>, late: u32) -> AttendanceSession {
        AttendanceSession {
            id: AttendanceSessionId::new(),
            session_ref: "cs-1".into(),
            class_id: "class-1".into(),
            opened_by: "t-1".into(),
            method: AttendanceMethod::Qr,
            current_token: None,
            rotation_secs: 15,
            open_time,
            close_time: open_time + TimeDelta::minutes(15),
            late_threshold_mins: late,
            geofence: None,
            status: SessionStatus::Open,
        }
    }

    #[test]
    fn test_external_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&StudentId::from("s-42")).unwrap();
        assert_eq!(json, "\"s-42\"");
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_method_uses_upper_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&AttendanceMethod::Qr).unwrap(), "\"QR\"");
        assert_eq!(serde_json::to_string(&SessionStatus::Cancelled).unwrap(), "\"CANCELLED\"");
    }

    #[test]
    fn test_record_status_uses_lower_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&AttendanceStatus::Late).unwrap(), "\"late\"");
        assert_eq!(serde_json::to_string(&CheckinSource::System).unwrap(), "\"system\"");
    }

    #[test]
    fn test_session_status_transitions_only_out_of_open() {
        use SessionStatus::*;
        assert!(Open.can_transition_to(Closed));
        assert!(Open.can_transition_to(Cancelled));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Open));
        assert!(Closed.is_terminal() && Cancelled.is_terminal());
        assert!(!Open.is_terminal());
    }

    #[test]
    fn test_is_late_at_is_strictly_after_threshold() {
        let t0 = Utc::now();
        let session = session_opened_at(t0, 10);
        assert!(!session.is_late_at(t0 + TimeDelta::minutes(5)));
        assert!(!session.is_late_at(t0 + TimeDelta::minutes(10)));
        assert!(session.is_late_at(t0 + TimeDelta::minutes(10) + TimeDelta::seconds(1)));
        assert!(session.is_late_at(t0 + TimeDelta::minutes(15)));
    }

    #[test]
    fn test_deadline_passed_at_close_time() {
        let t0 = Utc::now();
        let session = session_opened_at(t0, 10);
        assert!(!session.deadline_passed(t0 + TimeDelta::minutes(14)));
        assert!(session.deadline_passed(t0 + TimeDelta::minutes(15)));
    }

    #[test]
    fn test_absent_record_is_seeded_by_system() {
        let session = session_opened_at(Utc::now(), 10);
        let record = AttendanceRecord::absent(&session, "s-1".into());
        assert_eq!(record.status, AttendanceStatus::Absent);
        assert_eq!(record.source, CheckinSource::System);
        assert_eq!(record.attendance_session_id, session.id);
        assert_eq!(record.session_ref, session.session_ref);
        assert!(record.checkin_time.is_none());
    }

    #[test]
    fn test_stats_counts_each_status() {
        let session = session_opened_at(Utc::now(), 10);
        let mut records: Vec<_> = (0..5)
            .map(|i| AttendanceRecord::absent(&session, format!("s-{i}").into()))
            .collect();
        records[0].status = AttendanceStatus::Present;
        records[1].status = AttendanceStatus::Present;
        records[2].status = AttendanceStatus::Late;
        records[3].status = AttendanceStatus::Excused;

        let stats = SessionStats::from_records(&records);
        assert_eq!(
            stats,
            SessionStats { total: 5, present: 2, late: 1, absent: 1, excused: 1 }
        );
    }

    #[test]
    fn test_distance_between_nearby_points() {
        // Two points ~111 m apart along a meridian.
        let a = Coordinates { latitude: 10.0, longitude: 106.0 };
        let b = Coordinates { latitude: 10.001, longitude: 106.0 };
        let d = a.distance_m(&b);
        assert!((d - 111.2).abs() < 1.0, "got {d}");
        assert_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn test_is_valid_rejects_nan_and_out_of_range() {
        assert!(Coordinates { latitude: -90.0, longitude: 180.0 }.is_valid());
        assert!(!Coordinates { latitude: f64::NAN, longitude: 106.0 }.is_valid());
        assert!(!Coordinates { latitude: 10.0, longitude: f64::INFINITY }.is_valid());
        assert!(!Coordinates { latitude: 91.0, longitude: 106.0 }.is_valid());
        assert!(!Coordinates { latitude: 10.0, longitude: -180.5 }.is_valid());
    }

    #[test]
    fn test_caller_as_student_reuses_user_id() {
        let caller = Caller { user_id: "u-9".into(), role: Role::Student };
        assert_eq!(caller.as_student(), StudentId::from("u-9"));
        assert!(!caller.role.is_staff());
        assert!(Role::Teacher.is_staff() && Role::Admin.is_staff());
    }
}
