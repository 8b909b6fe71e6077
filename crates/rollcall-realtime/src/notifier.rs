//! The notifier capability and its actor implementation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_protocol::{
    AttendanceSessionId, AttendanceStatus, CheckinSource, ConnectionId, SessionEvent,
    SessionStats, SessionStatus, StudentId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::NotifierError;

/// Where a subscribed connection receives its events.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates the per-connection event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Session-scoped publish/subscribe.
///
/// Implementable over any bidirectional transport; the engine only ever
/// calls [`broadcast`](Self::broadcast) and the typed helpers built on it.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Adds `conn` to `session`'s subscribers. Subscribing twice replaces
    /// the sink; a connection may hold many subscriptions.
    async fn subscribe(
        &self,
        conn: ConnectionId,
        session: AttendanceSessionId,
        sink: EventSender,
    ) -> Result<(), NotifierError>;

    /// Removes one subscription. Returns whether it existed.
    async fn unsubscribe(
        &self,
        conn: ConnectionId,
        session: AttendanceSessionId,
    ) -> Result<bool, NotifierError>;

    /// Removes every subscription `conn` holds. Returns how many.
    async fn disconnect(&self, conn: ConnectionId) -> Result<usize, NotifierError>;

    /// Delivers `event` to its session's subscribers. Returns how many
    /// received it.
    async fn broadcast(&self, event: SessionEvent) -> Result<usize, NotifierError>;

    async fn broadcast_token_rotated(
        &self,
        session: AttendanceSessionId,
        token: String,
        at: DateTime<Utc>,
    ) -> Result<usize, NotifierError> {
        self.broadcast(SessionEvent::QrUpdated {
            attendance_session_id: session,
            token,
            timestamp: at,
        })
        .await
    }

    async fn broadcast_checkin(
        &self,
        session: AttendanceSessionId,
        student_id: StudentId,
        status: AttendanceStatus,
        checkin_time: DateTime<Utc>,
        source: CheckinSource,
    ) -> Result<usize, NotifierError> {
        self.broadcast(SessionEvent::StudentCheckedIn {
            attendance_session_id: session,
            student_id,
            status,
            checkin_time,
            source,
        })
        .await
    }

    async fn broadcast_session_closed(
        &self,
        session: AttendanceSessionId,
        status: SessionStatus,
        closed_at: DateTime<Utc>,
    ) -> Result<usize, NotifierError> {
        self.broadcast(SessionEvent::SessionClosed {
            attendance_session_id: session,
            status,
            closed_at,
        })
        .await
    }

    async fn broadcast_stats(
        &self,
        session: AttendanceSessionId,
        stats: SessionStats,
    ) -> Result<usize, NotifierError> {
        self.broadcast(SessionEvent::StatsUpdated {
            attendance_session_id: session,
            stats,
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum NotifierCommand {
    Subscribe {
        conn: ConnectionId,
        session: AttendanceSessionId,
        sink: EventSender,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        conn: ConnectionId,
        session: AttendanceSessionId,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        conn: ConnectionId,
        reply: oneshot::Sender<usize>,
    },
    Broadcast {
        event: SessionEvent,
        reply: oneshot::Sender<usize>,
    },
    SubscriberCount {
        session: AttendanceSessionId,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Handle to a running notifier actor.
///
/// Cheap to clone: it wraps an `mpsc::Sender`. Commands from one handle
/// are processed in the order they were sent.
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
}

impl NotifierHandle {
    /// Default command channel capacity.
    pub const DEFAULT_CHANNEL_SIZE: usize = 64;

    /// Spawns the actor task. `channel_size` bounds the command queue;
    /// callers wait when it is full.
    pub fn spawn(channel_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_size.max(1));
        let actor = NotifierActor {
            subscribers: HashMap::new(),
            memberships: HashMap::new(),
            receiver: rx,
        };
        tokio::spawn(actor.run());
        Self { sender: tx }
    }

    /// Number of live subscribers of `session`.
    pub async fn subscriber_count(
        &self,
        session: AttendanceSessionId,
    ) -> Result<usize, NotifierError> {
        self.request(|reply| NotifierCommand::SubscriberCount { session, reply })
            .await
    }

    /// Stops the actor. Pending and later calls fail with `Unavailable`.
    pub async fn shutdown(&self) -> Result<(), NotifierError> {
        self.sender
            .send(NotifierCommand::Shutdown)
            .await
            .map_err(|_| NotifierError::Unavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NotifierCommand,
    ) -> Result<T, NotifierError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| NotifierError::Unavailable)?;
        reply_rx.await.map_err(|_| NotifierError::Unavailable)
    }
}

#[async_trait]
impl Notifier for NotifierHandle {
    async fn subscribe(
        &self,
        conn: ConnectionId,
        session: AttendanceSessionId,
        sink: EventSender,
    ) -> Result<(), NotifierError> {
        self.request(|reply| NotifierCommand::Subscribe {
            conn,
            session,
            sink,
            reply,
        })
        .await
    }

    async fn unsubscribe(
        &self,
        conn: ConnectionId,
        session: AttendanceSessionId,
    ) -> Result<bool, NotifierError> {
        self.request(|reply| NotifierCommand::Unsubscribe {
            conn,
            session,
            reply,
        })
        .await
    }

    async fn disconnect(&self, conn: ConnectionId) -> Result<usize, NotifierError> {
        self.request(|reply| NotifierCommand::Disconnect { conn, reply })
            .await
    }

    async fn broadcast(&self, event: SessionEvent) -> Result<usize, NotifierError> {
        self.request(|reply| NotifierCommand::Broadcast { event, reply })
            .await
    }
}

/// The actor state. Runs inside its own Tokio task.
struct NotifierActor {
    /// session → (connection → sink)
    subscribers: HashMap<AttendanceSessionId, HashMap<ConnectionId, EventSender>>,
    /// connection → sessions it subscribed to (reverse index for disconnect)
    memberships: HashMap<ConnectionId, HashSet<AttendanceSessionId>>,
    receiver: mpsc::Receiver<NotifierCommand>,
}

impl NotifierActor {
    async fn run(mut self) {
        info!("notifier started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                NotifierCommand::Subscribe {
                    conn,
                    session,
                    sink,
                    reply,
                } => {
                    self.handle_subscribe(conn, session, sink);
                    let _ = reply.send(());
                }
                NotifierCommand::Unsubscribe {
                    conn,
                    session,
                    reply,
                } => {
                    let _ = reply.send(self.handle_unsubscribe(conn, session));
                }
                NotifierCommand::Disconnect { conn, reply } => {
                    let _ = reply.send(self.handle_disconnect(conn));
                }
                NotifierCommand::Broadcast { event, reply } => {
                    let _ = reply.send(self.handle_broadcast(event));
                }
                NotifierCommand::SubscriberCount { session, reply } => {
                    let count = self.subscribers.get(&session).map_or(0, HashMap::len);
                    let _ = reply.send(count);
                }
                NotifierCommand::Shutdown => {
                    info!("notifier shutting down");
                    break;
                }
            }
        }

        info!("notifier stopped");
    }

    fn handle_subscribe(
        &mut self,
        conn: ConnectionId,
        session: AttendanceSessionId,
        sink: EventSender,
    ) {
        self.subscribers
            .entry(session)
            .or_default()
            .insert(conn, sink);
        self.memberships.entry(conn).or_default().insert(session);
        debug!(%conn, session_id = %session, "subscribed");
    }

    fn handle_unsubscribe(&mut self, conn: ConnectionId, session: AttendanceSessionId) -> bool {
        let removed = self.remove(conn, session);
        if let Some(sessions) = self.memberships.get_mut(&conn) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.memberships.remove(&conn);
            }
        }
        if removed {
            debug!(%conn, session_id = %session, "unsubscribed");
        }
        removed
    }

    fn handle_disconnect(&mut self, conn: ConnectionId) -> usize {
        let Some(sessions) = self.memberships.remove(&conn) else {
            return 0;
        };
        let count = sessions
            .into_iter()
            .filter(|session| self.remove(conn, *session))
            .count();
        debug!(%conn, subscriptions = count, "connection dropped from notifier");
        count
    }

    /// Sends to every subscriber of the event's session. Sinks whose
    /// receiver is gone are pruned on the spot.
    fn handle_broadcast(&mut self, event: SessionEvent) -> usize {
        let session = event.session_id();
        let Some(subs) = self.subscribers.get_mut(&session) else {
            trace!(session_id = %session, event = event.name(), "no subscribers");
            return 0;
        };

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (conn, sink) in subs.iter() {
            if sink.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*conn);
            }
        }
        for conn in dead {
            subs.remove(&conn);
            if let Some(sessions) = self.memberships.get_mut(&conn) {
                sessions.remove(&session);
                if sessions.is_empty() {
                    self.memberships.remove(&conn);
                }
            }
        }
        if subs.is_empty() {
            self.subscribers.remove(&session);
        }

        trace!(session_id = %session, event = event.name(), delivered, "broadcast");
        delivered
    }

    fn remove(&mut self, conn: ConnectionId, session: AttendanceSessionId) -> bool {
        let Some(subs) = self.subscribers.get_mut(&session) else {
            return false;
        };
        let removed = subs.remove(&conn).is_some();
        if subs.is_empty() {
            self.subscribers.remove(&session);
        }
        removed
    }
}
