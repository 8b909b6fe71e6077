//! `AttendanceEngine` builder and facade.
//!
//! The engine ties the layers together: repositories and the token store
//! for state, the device registry for anti-spoofing, the notifier for
//! realtime pushes, and the classroom and event-sink collaborators on
//! either side.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rollcall_devices::{DeviceRegistry, RegistryConfig};
use rollcall_protocol::{
    AttendanceRecord, AttendanceSession, AttendanceSessionId, AttendanceStatus, CheckinEvidence,
    ClassId, ConnectionId, DeviceId, DeviceMeta, DeviceRegistration, LeaveRequestApproved,
    OpenSessionRequest, QrPayload, RecordId, SessionRef, SessionStats, StudentId, TokenBinding,
    UserId,
};
use rollcall_realtime::{EventSender, Notifier, NotifierHandle};
use rollcall_tick::{SharedClock, SystemClock};
use rollcall_token::{KeyedLocks, MemoryTokenStore, QrTokenService, TokenStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::memory::{
    InMemoryClassroom, InMemoryRecordRepository, InMemorySessionRepository, LoggingEventSink,
};
use crate::ports::{Classroom, EventSink};
use crate::repository::{RecordRepository, SessionRepository};
use crate::{AttendanceError, CheckinProcessor, EngineConfig, SessionManager};

/// Builder for an [`AttendanceEngine`].
///
/// Every port has an in-memory default, so only the collaborators you care
/// about need wiring.
///
/// # Example
///
/// ```rust,ignore
/// let engine = AttendanceEngine::builder()
///     .config(EngineConfig::default())
///     .classroom(roster)
///     .build();
/// engine.start().await?;
/// ```
pub struct AttendanceEngineBuilder {
    config: EngineConfig,
    clock: Option<SharedClock>,
    classroom: Option<Arc<dyn Classroom>>,
    sessions: Option<Arc<dyn SessionRepository>>,
    records: Option<Arc<dyn RecordRepository>>,
    token_store: Option<Arc<dyn TokenStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Option<Arc<dyn EventSink>>,
}

impl AttendanceEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            classroom: None,
            sessions: None,
            records: None,
            token_store: None,
            notifier: None,
            events: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn classroom(mut self, classroom: Arc<dyn Classroom>) -> Self {
        self.classroom = Some(classroom);
        self
    }

    pub fn session_repository(mut self, repo: Arc<dyn SessionRepository>) -> Self {
        self.sessions = Some(repo);
        self
    }

    pub fn record_repository(mut self, repo: Arc<dyn RecordRepository>) -> Self {
        self.records = Some(repo);
        self
    }

    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Wires the engine. Must be called inside a Tokio runtime when the
    /// default notifier is used, since it spawns the notifier task.
    pub fn build(self) -> AttendanceEngine {
        let config = self.config.validated();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let token_store = self
            .token_store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new(Arc::clone(&clock))));
        let notifier = self.notifier.unwrap_or_else(|| {
            Arc::new(NotifierHandle::spawn(NotifierHandle::DEFAULT_CHANNEL_SIZE))
        });

        let ctx = Arc::new(EngineContext {
            tokens: QrTokenService::new(token_store, Arc::clone(&clock))
                .with_grace(config.token_grace),
            devices: DeviceRegistry::new(
                RegistryConfig {
                    max_active_devices: config.max_active_devices,
                },
                Arc::clone(&clock),
            ),
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(InMemorySessionRepository::new())),
            records: self
                .records
                .unwrap_or_else(|| Arc::new(InMemoryRecordRepository::new())),
            events: self.events.unwrap_or_else(|| Arc::new(LoggingEventSink)),
            notifier,
            clock,
            gates: KeyedLocks::new(),
            config,
        });

        let classroom = self
            .classroom
            .unwrap_or_else(|| Arc::new(InMemoryClassroom::new()));
        let checkins = CheckinProcessor::new(Arc::clone(&ctx));
        let sessions = SessionManager::new(Arc::clone(&ctx), classroom, checkins.clone());

        AttendanceEngine {
            ctx,
            sessions,
            checkins,
            sweeper: Mutex::new(None),
        }
    }
}

impl Default for AttendanceEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Every client-facing attendance operation, in one place.
pub struct AttendanceEngine {
    ctx: Arc<EngineContext>,
    sessions: SessionManager,
    checkins: CheckinProcessor,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AttendanceEngine {
    pub fn builder() -> AttendanceEngineBuilder {
        AttendanceEngineBuilder::new()
    }

    /// Resumes rotation for sessions left OPEN by a previous run and starts
    /// the auto-close sweep. Returns how many sessions were resumed.
    pub async fn start(&self) -> Result<usize, AttendanceError> {
        let resumed = self.sessions.resume_open_sessions().await?;
        let handle = self.sessions.spawn_auto_close();
        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            sweep_every = ?self.ctx.config.sweep_interval,
            "attendance engine started"
        );
        Ok(resumed)
    }

    /// Stops every background task and waits for it to finish.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Wall time as the engine sees it.
    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn checkins(&self) -> &CheckinProcessor {
        &self.checkins
    }

    /// Number of sessions with a live gate slot.
    pub fn active_gates(&self) -> usize {
        self.ctx.gates.len()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn open_session(
        &self,
        req: OpenSessionRequest,
        opened_by: &UserId,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.sessions.open(req, opened_by).await
    }

    pub async fn close_session(
        &self,
        id: AttendanceSessionId,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.sessions.close(id).await
    }

    pub async fn cancel_session(
        &self,
        id: AttendanceSessionId,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.sessions.cancel(id).await
    }

    pub async fn get_session(
        &self,
        id: AttendanceSessionId,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.sessions.get(id).await
    }

    pub async fn open_session_for_class(
        &self,
        class_id: &ClassId,
    ) -> Result<Option<AttendanceSession>, AttendanceError> {
        self.sessions.find_open_by_class(class_id).await
    }

    pub async fn latest_session_for_ref(
        &self,
        session_ref: &SessionRef,
    ) -> Result<Option<AttendanceSession>, AttendanceError> {
        self.sessions.latest_by_ref(session_ref).await
    }

    pub async fn current_qr(
        &self,
        id: AttendanceSessionId,
    ) -> Result<Option<QrPayload>, AttendanceError> {
        self.sessions.current_qr(id).await
    }

    /// The session a token is bound to, or `None` if it is expired,
    /// rotated away or unknown.
    pub async fn validate_token(&self, token: &str) -> Result<Option<TokenBinding>, AttendanceError> {
        Ok(self.ctx.tokens.validate(token).await?)
    }

    pub async fn close_expired(&self) -> usize {
        self.sessions.close_expired(self.ctx.clock.now()).await
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    pub async fn checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        evidence: CheckinEvidence,
    ) -> Result<AttendanceRecord, AttendanceError> {
        self.checkins.checkin(session_id, student_id, evidence).await
    }

    pub async fn manual_checkin(
        &self,
        session_id: AttendanceSessionId,
        student_id: &StudentId,
        marked_by: &UserId,
        note: Option<String>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        self.checkins
            .manual_checkin(session_id, student_id, marked_by, note)
            .await
    }

    pub async fn update_record_status(
        &self,
        record_id: RecordId,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<AttendanceRecord, AttendanceError> {
        self.checkins.update_record_status(record_id, status, note).await
    }

    pub async fn stats(&self, session_id: AttendanceSessionId) -> Result<SessionStats, AttendanceError> {
        self.checkins.stats(session_id).await
    }

    pub async fn records(
        &self,
        session_id: AttendanceSessionId,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        self.checkins.records(session_id).await
    }

    pub async fn student_records(
        &self,
        student_id: &StudentId,
        class_id: Option<&ClassId>,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        self.checkins.student_records(student_id, class_id).await
    }

    pub async fn mark_excused(
        &self,
        session_refs: &[SessionRef],
        student_id: &StudentId,
        leave_request_id: &str,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        self.checkins
            .mark_excused(session_refs, student_id, leave_request_id)
            .await
    }

    /// Inbound hook for the leave workflow.
    pub async fn handle_leave_approved(
        &self,
        event: LeaveRequestApproved,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        self.mark_excused(&event.session_ids, &event.student_id, &event.leave_request_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    pub async fn register_device(
        &self,
        student_id: &StudentId,
        device_id: DeviceId,
        meta: DeviceMeta,
    ) -> Result<DeviceRegistration, AttendanceError> {
        Ok(self.ctx.devices.register(student_id, device_id, meta).await?)
    }

    pub async fn list_devices(&self, student_id: &StudentId) -> Vec<DeviceRegistration> {
        self.ctx.devices.list(student_id).await
    }

    pub async fn block_device(&self, device_id: &DeviceId) -> Result<DeviceRegistration, AttendanceError> {
        Ok(self.ctx.devices.block(device_id).await?)
    }

    pub async fn unblock_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<DeviceRegistration, AttendanceError> {
        Ok(self.ctx.devices.unblock(device_id).await?)
    }

    pub async fn remove_device(
        &self,
        student_id: &StudentId,
        device_id: &DeviceId,
    ) -> Result<(), AttendanceError> {
        Ok(self.ctx.devices.remove(student_id, device_id).await?)
    }

    // -----------------------------------------------------------------------
    // Realtime
    // -----------------------------------------------------------------------

    /// Subscribes `conn` to a session's realtime events.
    pub async fn subscribe(
        &self,
        conn: ConnectionId,
        session_id: AttendanceSessionId,
        sink: EventSender,
    ) -> Result<(), AttendanceError> {
        self.sessions.get(session_id).await?;
        self.ctx
            .notifier
            .subscribe(conn, session_id, sink)
            .await
            .map_err(unavailable)
    }

    pub async fn unsubscribe(
        &self,
        conn: ConnectionId,
        session_id: AttendanceSessionId,
    ) -> Result<bool, AttendanceError> {
        self.ctx
            .notifier
            .unsubscribe(conn, session_id)
            .await
            .map_err(unavailable)
    }

    /// Drops every subscription `conn` holds. Never fails; a stopped
    /// notifier has nothing left to drop.
    pub async fn disconnect(&self, conn: ConnectionId) {
        if let Err(e) = self.ctx.notifier.disconnect(conn).await {
            warn!(%conn, error = %e, "notifier cleanup skipped");
        }
    }
}

fn unavailable(e: rollcall_realtime::NotifierError) -> AttendanceError {
    AttendanceError::CollaboratorUnavailable {
        collaborator: "notifier",
        reason: e.to_string(),
    }
}
