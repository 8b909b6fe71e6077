//! The collaborators every engine component shares.

use std::sync::Arc;

use rollcall_devices::DeviceRegistry;
use rollcall_protocol::{AttendanceSessionId, DomainEvent};
use rollcall_realtime::Notifier;
use rollcall_tick::SharedClock;
use rollcall_token::{KeyedLocks, QrTokenService};

use crate::EngineConfig;
use crate::ports::{EventSink, emit};
use crate::repository::{RecordRepository, SessionRepository};

pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) clock: SharedClock,
    pub(crate) sessions: Arc<dyn SessionRepository>,
    pub(crate) records: Arc<dyn RecordRepository>,
    pub(crate) tokens: QrTokenService,
    pub(crate) devices: DeviceRegistry,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) events: Arc<dyn EventSink>,
    /// One gate per attendance session. Check-ins hold it shared;
    /// close, cancel and rotation hold it exclusively, so a status change
    /// never interleaves with a check-in or a token push.
    pub(crate) gates: KeyedLocks<AttendanceSessionId>,
}

impl EngineContext {
    pub(crate) async fn emit(&self, event: DomainEvent) {
        emit(self.events.as_ref(), self.config.collaborator_timeout, event).await;
    }
}
