//! Persistence ports for sessions and records.
//!
//! The engine never reads a row and writes it back unguarded. Every state
//! change that races goes through a conditional operation here
//! ([`SessionRepository::insert_if_none_open`],
//! [`SessionRepository::finish`], [`RecordRepository::apply_checkin`]), so
//! an implementation backed by a database maps each one onto a single
//! conditional statement or row-locked transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, AttendanceSession, AttendanceSessionId, AttendanceStatus, CheckinSource,
    ClassId, Coordinates, DeviceId, RecordId, SessionRef, SessionStatus, StudentId, UserId,
};

/// A storage backend failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Outcome of [`SessionRepository::finish`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The session was OPEN and now has the target status.
    Applied(AttendanceSession),
    /// The session had already left OPEN; nothing was written.
    NotOpen(SessionStatus),
    Missing,
}

/// The fields a successful check-in writes.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinUpdate {
    pub status: AttendanceStatus,
    pub checkin_time: DateTime<Utc>,
    pub source: CheckinSource,
    pub device_id: Option<DeviceId>,
    pub location: Option<Coordinates>,
    pub distance_to_reference_m: Option<f64>,
    pub marked_by: Option<UserId>,
    pub note: Option<String>,
}

/// Outcome of [`RecordRepository::apply_checkin`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckinCommit {
    Committed(AttendanceRecord),
    /// The record was already PRESENT or LATE; it is returned unchanged.
    AlreadyCheckedIn(AttendanceRecord),
    Missing,
}

#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Inserts `session` unless an OPEN session already exists for the
    /// same class and session reference. Returns whether it was inserted.
    async fn insert_if_none_open(&self, session: AttendanceSession) -> Result<bool, StoreError>;

    async fn get(&self, id: AttendanceSessionId) -> Result<Option<AttendanceSession>, StoreError>;

    async fn set_token(
        &self,
        id: AttendanceSessionId,
        token: Option<String>,
    ) -> Result<(), StoreError>;

    /// Moves an OPEN session to `target`, stamping `close_time = at` and
    /// clearing its token. Sessions in any other status are left alone.
    async fn finish(
        &self,
        id: AttendanceSessionId,
        target: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    async fn find_open_by_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, StoreError>;

    /// The most recently opened session for `session_ref`, in any status.
    async fn latest_by_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, StoreError>;

    async fn find_open_by_class(
        &self,
        class_id: &ClassId,
    ) -> Result<Option<AttendanceSession>, StoreError>;

    async fn list_open(&self) -> Result<Vec<AttendanceSession>, StoreError>;
}

#[async_trait]
pub trait RecordRepository: Send + Sync + 'static {
    /// Inserts each record, skipping any whose (session, student) pair
    /// already exists. Returns how many were inserted.
    async fn insert_absent(&self, records: Vec<AttendanceRecord>) -> Result<usize, StoreError>;

    async fn find(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Applies `update` only if the record is not already PRESENT or LATE.
    /// The check and the write are one atomic step.
    async fn apply_checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        update: CheckinUpdate,
    ) -> Result<CheckinCommit, StoreError>;

    /// Unconditionally sets a record's status, replacing the note when one
    /// is given.
    async fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Marks every record of `student_id` in the referenced sessions as
    /// EXCUSED with `note`. Returns the updated records.
    async fn mark_excused(
        &self,
        session_refs: &[SessionRef],
        student_id: &StudentId,
        note: String,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Records of one session, in seeding order.
    async fn list_by_session(
        &self,
        session_id: AttendanceSessionId,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    async fn list_by_student(&self, student_id: &StudentId)
    -> Result<Vec<AttendanceRecord>, StoreError>;
}
