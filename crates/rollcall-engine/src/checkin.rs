//! The check-in processor: the one place an attendance outcome is decided
//! and committed.

use std::collections::HashMap;
use std::sync::Arc;

use rollcall_protocol::{
    AttendanceRecord, AttendanceSession, AttendanceSessionId, AttendanceStatus, CheckinEvidence,
    CheckinSource, ClassId, Coordinates, DomainEvent, RecordId, SessionRef, SessionStats,
    StudentId, UserId,
};
use tracing::{debug, info, warn};

use crate::AttendanceError;
use crate::context::EngineContext;
use crate::repository::{CheckinCommit, CheckinUpdate};

/// Validates and records student check-ins, and answers questions about
/// records.
#[derive(Clone)]
pub struct CheckinProcessor {
    ctx: Arc<EngineContext>,
}

impl CheckinProcessor {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Seeds one ABSENT/SYSTEM record per student. Students who already
    /// have a record in this session are skipped, so a retried seed is
    /// harmless. Returns how many records were created.
    pub async fn seed_absent(
        &self,
        session: &AttendanceSession,
        student_ids: Vec<StudentId>,
    ) -> Result<usize, AttendanceError> {
        let rows = student_ids
            .into_iter()
            .map(|student| AttendanceRecord::absent(session, student))
            .collect();
        let inserted = self.ctx.records.insert_absent(rows).await?;
        debug!(session_id = %session.id, inserted, "absent records seeded");
        Ok(inserted)
    }

    /// Self-service check-in.
    ///
    /// Checks run in a fixed order: token, device, coordinates, record,
    /// session status, geofence, already-checked-in. Every piece of
    /// evidence is optional whatever the session method; with neither a
    /// token nor a location the source is MANUAL. The final write is
    /// conditional, so of two concurrent attempts for one student exactly
    /// one commits.
    ///
    /// # Errors
    /// - [`AttendanceError::TokenRejected`] / [`AttendanceError::TokenSessionMismatch`]
    /// - [`AttendanceError::DeviceNotRegistered`]
    /// - [`AttendanceError::RecordNotFound`] if the student is not enrolled.
    /// - [`AttendanceError::NotOpen`]
    /// - [`AttendanceError::InvalidLocation`] for coordinates off the globe.
    /// - [`AttendanceError::OutOfRange`]
    /// - [`AttendanceError::AlreadyCheckedIn`]
    pub async fn checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        evidence: CheckinEvidence,
    ) -> Result<AttendanceRecord, AttendanceError> {
        if let Some(token) = evidence.qr_token.as_deref() {
            let binding = self
                .ctx
                .tokens
                .validate(token)
                .await?
                .ok_or(AttendanceError::TokenRejected)?;
            // The token's own binding wins over whatever the caller claims.
            if binding.attendance_session_id != session_id {
                return Err(AttendanceError::TokenSessionMismatch);
            }
        }

        if let Some(device_id) = &evidence.device_id {
            if !self.ctx.devices.is_valid(student_id, device_id).await {
                return Err(AttendanceError::DeviceNotRegistered(device_id.clone()));
            }
        }

        let location = evidence.location();
        if location.is_some_and(|at| !at.is_valid()) {
            return Err(AttendanceError::InvalidLocation);
        }

        let outcome = {
            let _gate = self.ctx.gates.read(&session_id).await;
            self.checkin_gated(session_id, student_id, evidence, location).await
        };
        self.ctx.gates.forget(&session_id);
        let (record, session) = outcome?;

        info!(
            session_id = %session_id,
            %student_id,
            status = %record.status,
            source = %record.source,
            "student checked in"
        );
        self.emit_checked_in(&session, &record).await;
        Ok(record)
    }

    /// Teacher override: marks the student PRESENT with source MANUAL.
    /// Skips token and device checks but, like self-service, never
    /// overwrites a record that is already PRESENT or LATE.
    pub async fn manual_checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        marked_by: &UserId,
        note: Option<String>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let update = CheckinUpdate {
            status: AttendanceStatus::Present,
            checkin_time: self.ctx.clock.now(),
            source: CheckinSource::Manual,
            device_id: None,
            location: None,
            distance_to_reference_m: None,
            marked_by: Some(marked_by.clone()),
            note,
        };
        let outcome = {
            let _gate = self.ctx.gates.read(&session_id).await;
            self.load_and_commit(session_id, student_id, update).await
        };
        self.ctx.gates.forget(&session_id);
        let (record, session) = outcome?;

        info!(session_id = %session_id, %student_id, %marked_by, "manual check-in");
        self.emit_checked_in(&session, &record).await;
        Ok(record)
    }

    /// Marks the student EXCUSED in every referenced class meeting,
    /// whatever the current status. Returns the updated records.
    pub async fn mark_excused(
        &self,
        session_refs: &[SessionRef],
        student_id: &StudentId,
        leave_request_id: &str,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let note = format!("Leave request: {leave_request_id}");
        let updated = self
            .ctx
            .records
            .mark_excused(session_refs, student_id, note)
            .await?;
        info!(%student_id, leave_request_id, updated = updated.len(), "records excused");

        let now = self.ctx.clock.now();
        let mut touched = Vec::new();
        for record in &updated {
            if !touched.contains(&record.attendance_session_id) {
                touched.push(record.attendance_session_id);
            }
            self.ctx
                .emit(DomainEvent::AttendanceExcusedUpdated {
                    session_ref: record.session_ref.clone(),
                    student_id: student_id.clone(),
                    leave_request_id: leave_request_id.to_owned(),
                    updated_at: now,
                })
                .await;
        }
        for session_id in touched {
            self.push_stats(session_id).await;
        }
        Ok(updated)
    }

    /// Administrative correction of one record's status.
    pub async fn update_record_status(
        &self,
        record_id: RecordId,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let existing = self
            .ctx
            .records
            .get(record_id)
            .await?
            .ok_or(AttendanceError::RecordIdNotFound(record_id))?;

        let session_id = existing.attendance_session_id;
        let outcome = {
            let _gate = self.ctx.gates.read(&session_id).await;
            match self.ctx.records.set_status(record_id, status, note).await {
                Ok(Some(record)) => {
                    self.push_stats(session_id).await;
                    Ok(record)
                }
                Ok(None) => Err(AttendanceError::RecordIdNotFound(record_id)),
                Err(e) => Err(e.into()),
            }
        };
        self.ctx.gates.forget(&session_id);
        let record = outcome?;

        info!(%record_id, from = %existing.status, to = %status, "record status updated");
        Ok(record)
    }

    /// Head counts for one session.
    pub async fn stats(&self, session_id: AttendanceSessionId) -> Result<SessionStats, AttendanceError> {
        let records = self.records(session_id).await?;
        Ok(SessionStats::from_records(&records))
    }

    /// Every record of one session, in seeding order.
    pub async fn records(
        &self,
        session_id: AttendanceSessionId,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        if self.ctx.sessions.get(session_id).await?.is_none() {
            return Err(AttendanceError::SessionNotFound(session_id));
        }
        Ok(self.ctx.records.list_by_session(session_id).await?)
    }

    /// A student's records, optionally limited to one class, most recently
    /// opened session first.
    pub async fn student_records(
        &self,
        student_id: &StudentId,
        class_id: Option<&ClassId>,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let records = self.ctx.records.list_by_student(student_id).await?;

        let mut open_times = HashMap::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            let session_id = record.attendance_session_id;
            if !open_times.contains_key(&session_id) {
                let Some(session) = self.ctx.sessions.get(session_id).await? else {
                    continue;
                };
                open_times.insert(session_id, (session.open_time, session.class_id));
            }
            let in_class = match (class_id, open_times.get(&session_id)) {
                (Some(wanted), Some((_, class))) => class == wanted,
                _ => true,
            };
            if in_class {
                kept.push(record);
            }
        }

        kept.sort_by(|a, b| {
            let at = |r: &AttendanceRecord| open_times.get(&r.attendance_session_id).map(|(t, _)| *t);
            at(b).cmp(&at(a))
        });
        Ok(kept)
    }

    // -- internals ----------------------------------------------------------

    /// The gated part of a self-service check-in. Callers hold the session
    /// gate.
    async fn checkin_gated(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        evidence: CheckinEvidence,
        location: Option<Coordinates>,
    ) -> Result<(AttendanceRecord, AttendanceSession), AttendanceError> {
        let session = self.load_open(session_id, student_id).await?;

        let distance = match (location, session.geofence) {
            (Some(at), Some(fence)) => {
                let distance_m = at.distance_m(&fence.center);
                if distance_m.is_nan() || distance_m > fence.radius_m {
                    return Err(AttendanceError::OutOfRange {
                        distance_m,
                        radius_m: fence.radius_m,
                    });
                }
                Some(distance_m)
            }
            _ => None,
        };

        let now = self.ctx.clock.now();
        let status = if session.is_late_at(now) {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };
        let source = if evidence.qr_token.is_some() {
            CheckinSource::Qr
        } else if location.is_some() {
            CheckinSource::Gps
        } else {
            CheckinSource::Manual
        };

        let update = CheckinUpdate {
            status,
            checkin_time: now,
            source,
            device_id: evidence.device_id,
            location,
            distance_to_reference_m: distance,
            marked_by: None,
            note: None,
        };
        let record = self.commit(&session, student_id, update).await?;
        Ok((record, session))
    }

    async fn load_and_commit(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        update: CheckinUpdate,
    ) -> Result<(AttendanceRecord, AttendanceSession), AttendanceError> {
        let session = self.load_open(session_id, student_id).await?;
        let record = self.commit(&session, student_id, update).await?;
        Ok((record, session))
    }

    /// Loads the student's record and its session, requiring the session to
    /// be OPEN. Callers hold the session gate.
    async fn load_open(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
    ) -> Result<AttendanceSession, AttendanceError> {
        if self.ctx.records.find(session_id, student_id).await?.is_none() {
            return Err(AttendanceError::RecordNotFound {
                session_id,
                student_id: student_id.clone(),
            });
        }
        let session = self
            .ctx
            .sessions
            .get(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(session_id))?;
        if !session.is_open() {
            return Err(AttendanceError::NotOpen(session_id));
        }
        Ok(session)
    }

    /// Conditional write plus the realtime pushes. Callers hold the
    /// session gate, so the pushes land before any session-closed event.
    async fn commit(
        &self,
        session: &AttendanceSession,
        student_id: &StudentId,
        update: CheckinUpdate,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let record = match self
            .ctx
            .records
            .apply_checkin(session.id, student_id, update)
            .await?
        {
            CheckinCommit::Committed(record) => record,
            CheckinCommit::AlreadyCheckedIn(_) => {
                return Err(AttendanceError::AlreadyCheckedIn(student_id.clone()));
            }
            CheckinCommit::Missing => {
                return Err(AttendanceError::RecordNotFound {
                    session_id: session.id,
                    student_id: student_id.clone(),
                });
            }
        };

        if let Some(checkin_time) = record.checkin_time {
            if let Err(e) = self
                .ctx
                .notifier
                .broadcast_checkin(
                    session.id,
                    student_id.clone(),
                    record.status,
                    checkin_time,
                    record.source,
                )
                .await
            {
                warn!(session_id = %session.id, error = %e, "check-in broadcast failed");
            }
        }
        self.push_stats(session.id).await;
        Ok(record)
    }

    async fn push_stats(&self, session_id: AttendanceSessionId) {
        let stats = match self.ctx.records.list_by_session(session_id).await {
            Ok(records) => SessionStats::from_records(&records),
            Err(e) => {
                warn!(%session_id, error = %e, "stats unavailable for broadcast");
                return;
            }
        };
        if let Err(e) = self.ctx.notifier.broadcast_stats(session_id, stats).await {
            warn!(%session_id, error = %e, "stats broadcast failed");
        }
    }

    async fn emit_checked_in(&self, session: &AttendanceSession, record: &AttendanceRecord) {
        let Some(checkin_time) = record.checkin_time else {
            return;
        };
        self.ctx
            .emit(DomainEvent::AttendanceCheckedIn {
                attendance_session_id: session.id,
                session_ref: session.session_ref.clone(),
                class_id: session.class_id.clone(),
                student_id: record.student_id.clone(),
                status: record.status,
                checkin_time,
                source: record.source,
            })
            .await;
    }
}
