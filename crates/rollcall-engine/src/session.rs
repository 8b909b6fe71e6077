//! The session manager: lifecycle, token rotation and auto-close.
//!
//! # Rotation
//!
//! Each OPEN QR session has exactly one rotation task, registered in
//! [`SessionManager`]'s own table together with its cancellation token.
//! Close and cancel remove and cancel the task while holding the session's
//! exclusive gate, and every tick takes the same gate and re-checks the
//! token and the session status before touching anything. So once a
//! session-closed event has been broadcast, no token-rotated event for that
//! session can follow.
//!
//! ```text
//! open ──► insert ──► seed ──► [QR] token + rotation task
//!                                       │ every rotation_secs
//!                                       ▼
//!                       gate(write) → still open? → rotate → push
//! close/cancel ──► gate(write) → finish → stop task → revoke → push closed
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rollcall_protocol::{
    AttendanceMethod, AttendanceSession, AttendanceSessionId, ClassId, DomainEvent,
    OpenSessionRequest, QrPayload, SessionRef, SessionStats, SessionStatus, TokenBinding, UserId,
};
use rollcall_tick::IntervalScheduler;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::ports::{Classroom, call_with_timeout};
use crate::repository::Transition;
use crate::{AttendanceError, CheckinProcessor};

struct Rotation {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    generation: u64,
}

struct Inner {
    ctx: Arc<EngineContext>,
    classroom: Arc<dyn Classroom>,
    checkins: CheckinProcessor,
    /// attendance session → its rotation task.
    rotations: Mutex<HashMap<AttendanceSessionId, Rotation>>,
    next_generation: AtomicU64,
    /// Parent of every rotation token and of the sweep loop.
    shutdown: CancellationToken,
}

enum RotationStep {
    Continue,
    Stop,
}

/// Owns attendance session lifecycle and every time-driven transition.
///
/// Cheap to clone; clones share one rotation table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        classroom: Arc<dyn Classroom>,
        checkins: CheckinProcessor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                classroom,
                checkins,
                rotations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Opens an attendance window for one class meeting.
    ///
    /// The roster is fetched before anything is written, so an unreachable
    /// classroom service leaves no trace. For QR sessions the returned
    /// session carries its first token.
    ///
    /// # Errors
    /// - [`AttendanceError::InvalidOptions`] for out-of-range options.
    /// - [`AttendanceError::UnknownClassSession`]
    /// - [`AttendanceError::AlreadyOpen`]
    /// - [`AttendanceError::CollaboratorUnavailable`] if the roster lookup
    ///   fails or times out.
    pub async fn open(
        &self,
        req: OpenSessionRequest,
        opened_by: &UserId,
    ) -> Result<AttendanceSession, AttendanceError> {
        let ctx = &self.inner.ctx;
        let opts = ctx.config.resolve(&req)?;
        let limit = ctx.config.collaborator_timeout;

        let info = call_with_timeout(
            "classroom",
            limit,
            self.inner.classroom.session_info(&req.session_ref),
        )
        .await?
        .ok_or_else(|| AttendanceError::UnknownClassSession(req.session_ref.clone()))?;

        if ctx.sessions.find_open_by_ref(&req.session_ref).await?.is_some() {
            return Err(AttendanceError::AlreadyOpen(req.session_ref));
        }

        let students = call_with_timeout(
            "classroom",
            limit,
            self.inner.classroom.enrolled_student_ids(&info.class_id),
        )
        .await?;

        let now = ctx.clock.now();
        let mut session = AttendanceSession {
            id: AttendanceSessionId::new(),
            session_ref: req.session_ref,
            class_id: info.class_id,
            opened_by: opened_by.clone(),
            method: req.method,
            current_token: None,
            rotation_secs: opts.rotation_secs,
            open_time: now,
            close_time: now + TimeDelta::minutes(i64::from(opts.duration_mins)),
            late_threshold_mins: opts.late_threshold_mins,
            geofence: opts.geofence,
            status: SessionStatus::Open,
        };

        if !ctx.sessions.insert_if_none_open(session.clone()).await? {
            return Err(AttendanceError::AlreadyOpen(session.session_ref));
        }

        let enrolled = students.len();
        if let Err(e) = self.inner.checkins.seed_absent(&session, students).await {
            // A session without its roster must not stay open.
            if let Err(undo) = ctx.sessions.finish(session.id, SessionStatus::Cancelled, now).await {
                warn!(session_id = %session.id, error = %undo, "could not cancel unseeded session");
            }
            return Err(e);
        }

        if session.method == AttendanceMethod::Qr {
            let _gate = ctx.gates.write(&session.id).await;
            if ctx.sessions.get(session.id).await?.is_some_and(|s| s.is_open()) {
                match ctx.tokens.generate(&binding(&session), session.rotation_secs).await {
                    Ok(token) => {
                        if let Err(e) = ctx.sessions.set_token(session.id, Some(token.clone())).await {
                            warn!(session_id = %session.id, error = %e, "initial token not persisted");
                        }
                        session.current_token = Some(token);
                    }
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "initial token failed, next rotation will issue one");
                    }
                }
                self.start_rotation(&session);
            }
        }

        info!(
            session_id = %session.id,
            session_ref = %session.session_ref,
            class_id = %session.class_id,
            method = %session.method,
            enrolled,
            close_time = %session.close_time,
            "attendance session opened"
        );

        ctx.emit(DomainEvent::AttendanceSessionOpened {
            attendance_session_id: session.id,
            session_ref: session.session_ref.clone(),
            class_id: session.class_id.clone(),
            teacher_id: session.opened_by.clone(),
            method: session.method,
            open_time: session.open_time,
            close_time: session.close_time,
        })
        .await;

        Ok(session)
    }

    /// OPEN → CLOSED. Students without a check-in stay ABSENT.
    pub async fn close(&self, id: AttendanceSessionId) -> Result<AttendanceSession, AttendanceError> {
        self.finish(id, SessionStatus::Closed).await
    }

    /// OPEN → CANCELLED. Records are left untouched.
    pub async fn cancel(&self, id: AttendanceSessionId) -> Result<AttendanceSession, AttendanceError> {
        self.finish(id, SessionStatus::Cancelled).await
    }

    async fn finish(
        &self,
        id: AttendanceSessionId,
        target: SessionStatus,
    ) -> Result<AttendanceSession, AttendanceError> {
        let ctx = &self.inner.ctx;
        let (session, totals) = {
            let _gate = ctx.gates.write(&id).await;
            let now = ctx.clock.now();
            let session = match ctx.sessions.finish(id, target, now).await? {
                Transition::Applied(session) => session,
                Transition::NotOpen(status) => {
                    return Err(AttendanceError::AlreadyFinished(id, status));
                }
                Transition::Missing => return Err(AttendanceError::SessionNotFound(id)),
            };

            self.stop_rotation(id);
            if let Err(e) = ctx.tokens.invalidate_session(id).await {
                warn!(session_id = %id, error = %e, "token invalidation failed");
            }
            if let Err(e) = ctx.notifier.broadcast_session_closed(id, target, now).await {
                warn!(session_id = %id, error = %e, "session-closed broadcast failed");
            }

            let totals = match ctx.records.list_by_session(id).await {
                Ok(records) => SessionStats::from_records(&records),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "totals unavailable");
                    SessionStats::default()
                }
            };
            (session, totals)
        };
        ctx.gates.forget(&id);

        info!(
            session_id = %id,
            status = %target,
            present = totals.present,
            late = totals.late,
            absent = totals.absent,
            "attendance session finished"
        );

        ctx.emit(DomainEvent::AttendanceSessionClosed {
            attendance_session_id: id,
            session_ref: session.session_ref.clone(),
            class_id: session.class_id.clone(),
            status: target,
            totals,
            closed_at: session.close_time,
        })
        .await;

        Ok(session)
    }

    /// Closes every OPEN session whose deadline is at or before `now`.
    /// A failure on one session is logged and does not stop the others.
    /// Returns how many were closed.
    pub async fn close_expired(&self, now: DateTime<Utc>) -> usize {
        let open = match self.inner.ctx.sessions.list_open().await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "auto-close sweep could not list open sessions");
                return 0;
            }
        };

        let mut closed = 0;
        for session in open.iter().filter(|s| s.deadline_passed(now)) {
            match self.close(session.id).await {
                Ok(_) => closed += 1,
                Err(AttendanceError::AlreadyFinished(..)) => {
                    debug!(session_id = %session.id, "closed concurrently");
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "auto-close failed");
                }
            }
        }
        if closed > 0 {
            info!(closed, "auto-close sweep");
        }
        closed
    }

    /// Starts the periodic auto-close sweep. Stops on
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_auto_close(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.shutdown.child_token();
        let period = self.inner.ctx.config.sweep_interval;

        let mut scheduler = IntervalScheduler::every(period);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = scheduler.wait_for_tick() => {}
                }
                let Some(manager) = upgrade(&weak) else { break };
                let now = manager.inner.ctx.clock.now();
                manager.close_expired(now).await;
            }
            debug!("auto-close sweep stopped");
        })
    }

    /// Re-creates rotation for every persisted OPEN QR session, issuing a
    /// fresh token since the token store may not have survived. Call once
    /// at startup. Returns how many sessions were resumed.
    pub async fn resume_open_sessions(&self) -> Result<usize, AttendanceError> {
        let ctx = &self.inner.ctx;
        let mut resumed = 0;
        for session in ctx.sessions.list_open().await? {
            if session.method != AttendanceMethod::Qr || self.has_rotation(session.id) {
                continue;
            }
            let _gate = ctx.gates.write(&session.id).await;
            match ctx.tokens.rotate(&binding(&session), session.rotation_secs).await {
                Ok(token) => {
                    if let Err(e) = ctx.sessions.set_token(session.id, Some(token)).await {
                        warn!(session_id = %session.id, error = %e, "resumed token not persisted");
                    }
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "resume token failed, next rotation will issue one");
                }
            }
            self.start_rotation(&session);
            resumed += 1;
        }
        info!(resumed, "open sessions resumed");
        Ok(resumed)
    }

    /// Stops the sweep and every rotation task, and waits for them.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let rotations: Vec<Rotation> = {
            let mut table = lock(&self.inner.rotations);
            table.drain().map(|(_, rotation)| rotation).collect()
        };
        for rotation in rotations {
            rotation.cancel.cancel();
            let _ = rotation.task.await;
        }
        info!("session manager stopped");
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: AttendanceSessionId) -> Result<AttendanceSession, AttendanceError> {
        self.inner
            .ctx
            .sessions
            .get(id)
            .await?
            .ok_or(AttendanceError::SessionNotFound(id))
    }

    pub async fn find_open_by_class(
        &self,
        class_id: &ClassId,
    ) -> Result<Option<AttendanceSession>, AttendanceError> {
        Ok(self.inner.ctx.sessions.find_open_by_class(class_id).await?)
    }

    pub async fn latest_by_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, AttendanceError> {
        Ok(self.inner.ctx.sessions.latest_by_ref(session_ref).await?)
    }

    /// The QR payload to display. `None` unless the session is an OPEN QR
    /// session with a live token.
    pub async fn current_qr(&self, id: AttendanceSessionId) -> Result<Option<QrPayload>, AttendanceError> {
        let ctx = &self.inner.ctx;
        let session = self.get(id).await?;
        if !session.is_open() || session.method != AttendanceMethod::Qr {
            return Ok(None);
        }
        let Some(token) = ctx.tokens.current_token(id).await? else {
            return Ok(None);
        };
        Ok(Some(QrPayload {
            checkin_url: format!("{}/checkin?token={token}", ctx.config.checkin_base_url),
            token,
            expires_in_secs: session.rotation_secs,
        }))
    }

    /// Number of running rotation tasks.
    pub fn active_rotations(&self) -> usize {
        lock(&self.inner.rotations).len()
    }

    fn has_rotation(&self, id: AttendanceSessionId) -> bool {
        lock(&self.inner.rotations).contains_key(&id)
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Spawns the rotation task for `session`, replacing any previous one.
    fn start_rotation(&self, session: &AttendanceSession) {
        let cancel = self.inner.shutdown.child_token();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let scheduler =
            IntervalScheduler::every(Duration::from_secs(u64::from(session.rotation_secs)));
        let task = tokio::spawn(rotation_loop(
            Arc::downgrade(&self.inner),
            scheduler,
            session.id,
            binding(session),
            session.rotation_secs,
            cancel.clone(),
            generation,
        ));

        let previous = lock(&self.inner.rotations).insert(
            session.id,
            Rotation {
                cancel,
                task,
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        debug!(session_id = %session.id, every_secs = session.rotation_secs, "rotation started");
    }

    /// Removes and cancels the session's rotation task. Callers hold the
    /// session's exclusive gate.
    fn stop_rotation(&self, id: AttendanceSessionId) -> bool {
        match lock(&self.inner.rotations).remove(&id) {
            Some(rotation) => {
                rotation.cancel.cancel();
                debug!(session_id = %id, "rotation stopped");
                true
            }
            None => false,
        }
    }

    /// Drops the table entry only if it still belongs to `generation`.
    fn forget_rotation(&self, id: AttendanceSessionId, generation: u64) {
        let mut table = lock(&self.inner.rotations);
        if table.get(&id).is_some_and(|r| r.generation == generation) {
            table.remove(&id);
        }
    }

    async fn rotate_once(
        &self,
        id: AttendanceSessionId,
        binding: &TokenBinding,
        rotation_secs: u32,
        cancel: &CancellationToken,
    ) -> RotationStep {
        let ctx = &self.inner.ctx;
        let _gate = ctx.gates.write(&id).await;
        if cancel.is_cancelled() {
            return RotationStep::Stop;
        }

        match ctx.sessions.get(id).await {
            Ok(Some(session)) if session.is_open() => {}
            Ok(_) => {
                debug!(session_id = %id, "session no longer open, rotation ends");
                return RotationStep::Stop;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "rotation tick skipped");
                return RotationStep::Continue;
            }
        }

        let token = match ctx.tokens.rotate(binding, rotation_secs).await {
            Ok(token) => token,
            Err(e) => {
                warn!(session_id = %id, error = %e, "token rotation failed");
                return RotationStep::Continue;
            }
        };
        if let Err(e) = ctx.sessions.set_token(id, Some(token.clone())).await {
            warn!(session_id = %id, error = %e, "rotated token not persisted");
        }
        if let Err(e) = ctx
            .notifier
            .broadcast_token_rotated(id, token, ctx.clock.now())
            .await
        {
            warn!(session_id = %id, error = %e, "token broadcast failed");
        }
        RotationStep::Continue
    }
}

async fn rotation_loop(
    weak: Weak<Inner>,
    mut scheduler: IntervalScheduler,
    id: AttendanceSessionId,
    binding: TokenBinding,
    rotation_secs: u32,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = scheduler.wait_for_tick() => {}
        }
        let Some(manager) = upgrade(&weak) else { break };
        match manager.rotate_once(id, &binding, rotation_secs, &cancel).await {
            RotationStep::Continue => {}
            RotationStep::Stop => {
                manager.forget_rotation(id, generation);
                break;
            }
        }
    }
    debug!(session_id = %id, ticks = scheduler.tick_count(), "rotation task exited");
}

fn upgrade(weak: &Weak<Inner>) -> Option<SessionManager> {
    weak.upgrade().map(|inner| SessionManager { inner })
}

fn binding(session: &AttendanceSession) -> TokenBinding {
    TokenBinding {
        attendance_session_id: session.id,
        class_id: session.class_id.clone(),
        session_ref: session.session_ref.clone(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
