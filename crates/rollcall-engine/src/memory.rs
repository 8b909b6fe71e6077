//! In-memory implementations of every engine port.
//!
//! Good for single-process deployments, the demo server, and tests. Each
//! conditional repository operation runs entirely under one lock, which
//! is what makes it atomic.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceRecord, AttendanceSession, AttendanceSessionId, AttendanceStatus, ClassId,
    DomainEvent, RecordId, SessionRef, SessionStatus, StudentId,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::ports::{ClassSessionInfo, Classroom, CollaboratorError, EventSink};
use crate::repository::{
    CheckinCommit, CheckinUpdate, RecordRepository, SessionRepository, StoreError, Transition,
};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<AttendanceSessionId, AttendanceSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert_if_none_open(&self, session: AttendanceSession) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let clash = sessions.values().any(|s| {
            s.is_open() && s.class_id == session.class_id && s.session_ref == session.session_ref
        });
        if clash {
            return Ok(false);
        }
        sessions.insert(session.id, session);
        Ok(true)
    }

    async fn get(&self, id: AttendanceSessionId) -> Result<Option<AttendanceSession>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn set_token(
        &self,
        id: AttendanceSessionId,
        token: Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.current_token = token;
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: AttendanceSessionId,
        target: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(Transition::Missing);
        };
        if !session.status.can_transition_to(target) {
            return Ok(Transition::NotOpen(session.status));
        }
        session.status = target;
        session.close_time = at;
        session.current_token = None;
        Ok(Transition::Applied(session.clone()))
    }

    async fn find_open_by_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.is_open() && &s.session_ref == session_ref)
            .cloned())
    }

    async fn latest_by_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| &s.session_ref == session_ref)
            .max_by_key(|s| s.open_time)
            .cloned())
    }

    async fn find_open_by_class(
        &self,
        class_id: &ClassId,
    ) -> Result<Option<AttendanceSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_open() && &s.class_id == class_id)
            .max_by_key(|s| s.open_time)
            .cloned())
    }

    async fn list_open(&self) -> Result<Vec<AttendanceSession>, StoreError> {
        let mut open: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|s| s.close_time);
        Ok(open)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordTable {
    /// Insertion order.
    rows: Vec<AttendanceRecord>,
    /// (session, student) → index into `rows`. The uniqueness constraint.
    by_pair: HashMap<(AttendanceSessionId, StudentId), usize>,
}

impl RecordTable {
    fn position(&self, session_id: AttendanceSessionId, student_id: &StudentId) -> Option<usize> {
        self.by_pair.get(&(session_id, student_id.clone())).copied()
    }
}

#[derive(Default)]
pub struct InMemoryRecordRepository {
    table: Mutex<RecordTable>,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn insert_absent(&self, records: Vec<AttendanceRecord>) -> Result<usize, StoreError> {
        let mut table = self.table.lock().await;
        let mut inserted = 0;
        for record in records {
            let key = (record.attendance_session_id, record.student_id.clone());
            if table.by_pair.contains_key(&key) {
                continue;
            }
            let index = table.rows.len();
            table.rows.push(record);
            table.by_pair.insert(key, index);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .position(session_id, student_id)
            .map(|i| table.rows[i].clone()))
    }

    async fn get(&self, id: RecordId) -> Result<Option<AttendanceRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.rows.iter().find(|r| r.id == id).cloned())
    }

    async fn apply_checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        update: CheckinUpdate,
    ) -> Result<CheckinCommit, StoreError> {
        let mut table = self.table.lock().await;
        let Some(index) = table.position(session_id, student_id) else {
            return Ok(CheckinCommit::Missing);
        };
        let record = &mut table.rows[index];
        if record.status.is_checked_in() {
            return Ok(CheckinCommit::AlreadyCheckedIn(record.clone()));
        }

        record.status = update.status;
        record.checkin_time = Some(update.checkin_time);
        record.source = update.source;
        record.device_id = update.device_id;
        record.location = update.location;
        record.distance_to_reference_m = update.distance_to_reference_m;
        record.marked_by = update.marked_by;
        if update.note.is_some() {
            record.note = update.note;
        }
        Ok(CheckinCommit::Committed(record.clone()))
    }

    async fn set_status(
        &self,
        id: RecordId,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let mut table = self.table.lock().await;
        let Some(record) = table.rows.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        record.status = status;
        if note.is_some() {
            record.note = note;
        }
        Ok(Some(record.clone()))
    }

    async fn mark_excused(
        &self,
        session_refs: &[SessionRef],
        student_id: &StudentId,
        note: String,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let refs: HashSet<&SessionRef> = session_refs.iter().collect();
        let mut table = self.table.lock().await;
        let updated = table
            .rows
            .iter_mut()
            .filter(|r| &r.student_id == student_id && refs.contains(&r.session_ref))
            .map(|r| {
                r.status = AttendanceStatus::Excused;
                r.note = Some(note.clone());
                r.clone()
            })
            .collect();
        Ok(updated)
    }

    async fn list_by_session(
        &self,
        session_id: AttendanceSessionId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .filter(|r| r.attendance_session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_by_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .iter()
            .filter(|r| &r.student_id == student_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Classroom
// ---------------------------------------------------------------------------

/// A fixed roster: which class each session reference belongs to, and who
/// is enrolled in each class.
#[derive(Default)]
pub struct InMemoryClassroom {
    sessions: HashMap<SessionRef, ClassId>,
    enrolment: HashMap<ClassId, Vec<StudentId>>,
    unavailable: AtomicBool,
}

impl InMemoryClassroom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class meeting.
    pub fn with_session(mut self, session_ref: impl Into<SessionRef>, class_id: impl Into<ClassId>) -> Self {
        self.sessions.insert(session_ref.into(), class_id.into());
        self
    }

    /// Sets the enrolled students of a class.
    pub fn with_students<I, S>(mut self, class_id: impl Into<ClassId>, students: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StudentId>,
    {
        self.enrolment
            .insert(class_id.into(), students.into_iter().map(Into::into).collect());
        self
    }

    /// While set, every call fails as if the roster service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("roster service unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Classroom for InMemoryClassroom {
    async fn session_info(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<ClassSessionInfo>, CollaboratorError> {
        self.check_available()?;
        Ok(self
            .sessions
            .get(session_ref)
            .map(|class_id| ClassSessionInfo { class_id: class_id.clone() }))
    }

    async fn enrolled_student_ids(
        &self,
        class_id: &ClassId,
    ) -> Result<Vec<StudentId>, CollaboratorError> {
        self.check_available()?;
        Ok(self.enrolment.get(class_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Event sinks
// ---------------------------------------------------------------------------

/// Writes each domain event to the log. The default sink when no
/// downstream consumer is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn publish(&self, event: DomainEvent) -> Result<(), CollaboratorError> {
        info!(pattern = event.pattern(), ?event, "domain event");
        Ok(())
    }
}

/// Keeps every published event for inspection.
#[derive(Default)]
pub struct RecordingEventSink {
    events: StdMutex<Vec<DomainEvent>>,
    failing: AtomicBool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Patterns of the published events, in order.
    pub fn patterns(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::pattern).collect()
    }

    /// While set, `publish` fails and records nothing.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: DomainEvent) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("sink rejected event"));
        }
        debug!(pattern = event.pattern(), "event recorded");
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}
