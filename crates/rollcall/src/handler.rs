//! Per-connection handler: handshake, auth, request routing, event push.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get the Caller
//!   3. Send HandshakeAck
//!   4. Loop: answer requests and forward events for subscribed sessions
//!      until the client leaves, goes idle, or the socket fails

use std::sync::Arc;

use rollcall_engine::{AttendanceEngine, AttendanceError};
use rollcall_protocol::{
    Caller, ClientEnvelope, ClientRequest, Codec, ConnectionId, ErrorKind, ProtocolError,
    ResponseBody, ServerEnvelope, ServerMessage, StudentId,
};
use rollcall_realtime::{EventSender, event_channel};
use rollcall_transport::{Connection, WebSocketConnection};

use crate::server::{PROTOCOL_VERSION, ServerState};
use crate::{Authenticator, RollcallError};

/// Drop guard that removes the connection from every subscription when
/// the handler exits, even by panic.
struct SubscriptionGuard {
    conn_id: ConnectionId,
    engine: Arc<AttendanceEngine>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.disconnect(conn_id).await;
        });
    }
}

/// Who is on the other end, and where their events go.
struct Peer {
    conn_id: ConnectionId,
    caller: Caller,
    events: EventSender,
}

enum Outcome {
    Reply(ServerMessage),
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), RollcallError>
where
    A: Authenticator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = ?conn.peer_addr(), "handling new connection");

    let mut seq: u64 = 1;

    // --- Step 1: Handshake ---
    let caller = perform_handshake(&conn, &state, &mut seq).await?;
    tracing::info!(%conn_id, user_id = %caller.user_id, role = ?caller.role, "caller authenticated");

    let (events, mut inbox) = event_channel();
    let peer = Peer {
        conn_id,
        caller,
        events,
    };
    let _guard = SubscriptionGuard {
        conn_id,
        engine: Arc::clone(&state.engine),
    };

    // --- Step 2: Message loop ---
    let idle_timeout = state.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                };
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                let envelope: ClientEnvelope = match state.codec.decode(&data) {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                        continue;
                    }
                };

                tracing::debug!(%conn_id, op = envelope.request.op(), seq = envelope.seq, "request");
                match route(&state, &peer, envelope.request).await {
                    Outcome::Reply(message) => {
                        send(&conn, &state, next_seq(&mut seq), Some(envelope.seq), message).await?;
                    }
                    Outcome::Close => break,
                }
            }
            Some(event) = inbox.recv() => {
                send(&conn, &state, next_seq(&mut seq), None, ServerMessage::Event { event }).await?;
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
            }
            () = &mut idle => {
                tracing::info!(%conn_id, "connection timed out");
                break;
            }
        }
    }

    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    // _guard drops here → subscriptions are removed.
    Ok(())
}

/// Performs the initial handshake: receive Handshake, validate, auth, send Ack.
async fn perform_handshake<A, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A, C>>,
    seq: &mut u64,
) -> Result<Caller, RollcallError>
where
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(RollcallError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: ClientEnvelope = state.codec.decode(&data)?;

    let (version, token) = match envelope.request {
        ClientRequest::Handshake { version, token } => (version, token),
        _ => {
            let reply = ServerMessage::error(ErrorKind::InvalidState, "expected handshake");
            send(conn, state, next_seq(seq), Some(envelope.seq), reply).await?;
            return Err(
                ProtocolError::InvalidMessage("first message must be a handshake".into()).into(),
            );
        }
    };

    if version != PROTOCOL_VERSION {
        let reply = ServerMessage::error(
            ErrorKind::InvalidState,
            format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        );
        send(conn, state, next_seq(seq), Some(envelope.seq), reply).await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let caller = match state.auth.authenticate(token.as_deref().unwrap_or("")).await {
        Ok(caller) => caller,
        Err(e) => {
            let reply = ServerMessage::error(ErrorKind::Unauthorized, "unauthorized");
            send(conn, state, next_seq(seq), Some(envelope.seq), reply).await?;
            return Err(RollcallError::Auth(e));
        }
    };

    let ack = ServerMessage::HandshakeAck {
        user_id: caller.user_id.clone(),
        role: caller.role,
        server_time: state.engine.now(),
    };
    send(conn, state, next_seq(seq), Some(envelope.seq), ack).await?;

    Ok(caller)
}

/// Decides what to answer. Engine failures become error frames; only
/// socket failures end the connection.
async fn route<A, C>(state: &ServerState<A, C>, peer: &Peer, request: ClientRequest) -> Outcome
where
    A: Authenticator,
    C: Codec,
{
    match request {
        ClientRequest::Heartbeat { client_time } => Outcome::Reply(ServerMessage::HeartbeatAck {
            client_time,
            server_time: state.elapsed_ms(),
        }),
        ClientRequest::Disconnect { reason } => {
            tracing::info!(conn_id = %peer.conn_id, %reason, "client disconnected");
            Outcome::Close
        }
        ClientRequest::Handshake { .. } => Outcome::Reply(ServerMessage::error(
            ErrorKind::InvalidState,
            "already authenticated",
        )),
        request if request.requires_staff() && !peer.caller.role.is_staff() => {
            tracing::debug!(
                conn_id = %peer.conn_id,
                user_id = %peer.caller.user_id,
                op = request.op(),
                "staff-only operation refused"
            );
            Outcome::Reply(ServerMessage::error(
                ErrorKind::Forbidden,
                format!("{} requires a teacher or admin", request.op()),
            ))
        }
        request => {
            let op = request.op();
            match dispatch(&state.engine, peer, request).await {
                Ok(body) => Outcome::Reply(ServerMessage::Response { body }),
                Err(e) => {
                    tracing::debug!(conn_id = %peer.conn_id, op, error = %e, "request failed");
                    Outcome::Reply(ServerMessage::error(e.kind(), e.to_string()))
                }
            }
        }
    }
}

/// Runs one engine operation on the caller's behalf.
async fn dispatch(
    engine: &AttendanceEngine,
    peer: &Peer,
    request: ClientRequest,
) -> Result<ResponseBody, AttendanceError> {
    let caller = &peer.caller;
    let body = match request {
        // Answered by `route` before dispatch.
        ClientRequest::Handshake { .. }
        | ClientRequest::Heartbeat { .. }
        | ClientRequest::Disconnect { .. } => ResponseBody::Ack,

        // -- Sessions --
        ClientRequest::OpenSession(req) => {
            ResponseBody::Session(engine.open_session(req, &caller.user_id).await?)
        }
        ClientRequest::CloseSession {
            attendance_session_id,
        } => ResponseBody::Session(engine.close_session(attendance_session_id).await?),
        ClientRequest::CancelSession {
            attendance_session_id,
        } => ResponseBody::Session(engine.cancel_session(attendance_session_id).await?),
        ClientRequest::GetSession {
            attendance_session_id,
        } => ResponseBody::Session(engine.get_session(attendance_session_id).await?),
        ClientRequest::GetOpenSessionForClass { class_id } => {
            ResponseBody::MaybeSession(engine.open_session_for_class(&class_id).await?)
        }
        ClientRequest::GetQr {
            attendance_session_id,
        } => ResponseBody::Qr(engine.current_qr(attendance_session_id).await?),
        ClientRequest::ValidateToken { token } => {
            ResponseBody::TokenValidation(engine.validate_token(&token).await?)
        }

        // -- Records --
        ClientRequest::GetStats {
            attendance_session_id,
        } => ResponseBody::Stats(engine.stats(attendance_session_id).await?),
        ClientRequest::ListRecords {
            attendance_session_id,
        } => ResponseBody::Records(engine.records(attendance_session_id).await?),
        ClientRequest::StudentRecords {
            student_id,
            class_id,
        } => {
            let student = scoped_student(caller, student_id);
            ResponseBody::Records(engine.student_records(&student, class_id.as_ref()).await?)
        }
        ClientRequest::ManualCheckin {
            attendance_session_id,
            student_id,
            note,
        } => ResponseBody::Record(
            engine
                .manual_checkin(attendance_session_id, &student_id, &caller.user_id, note)
                .await?,
        ),
        ClientRequest::UpdateRecordStatus {
            record_id,
            status,
            note,
        } => ResponseBody::Record(engine.update_record_status(record_id, status, note).await?),
        ClientRequest::Checkin {
            attendance_session_id,
            evidence,
        } => ResponseBody::Record(
            engine
                .checkin(attendance_session_id, &caller.as_student(), evidence)
                .await?,
        ),

        // -- Devices --
        ClientRequest::RegisterDevice { device_id, meta } => ResponseBody::Device(
            engine
                .register_device(&caller.as_student(), device_id, meta)
                .await?,
        ),
        ClientRequest::ListDevices { student_id } => {
            let student = scoped_student(caller, student_id);
            ResponseBody::Devices(engine.list_devices(&student).await)
        }
        ClientRequest::BlockDevice { device_id } => {
            ResponseBody::Device(engine.block_device(&device_id).await?)
        }
        ClientRequest::UnblockDevice { device_id } => {
            ResponseBody::Device(engine.unblock_device(&device_id).await?)
        }
        ClientRequest::RemoveDevice {
            device_id,
            student_id,
        } => {
            let student = scoped_student(caller, student_id);
            engine.remove_device(&student, &device_id).await?;
            ResponseBody::Ack
        }

        // -- Realtime --
        ClientRequest::Subscribe {
            attendance_session_id,
        } => {
            engine
                .subscribe(peer.conn_id, attendance_session_id, peer.events.clone())
                .await?;
            ResponseBody::Subscribed(attendance_session_id)
        }
        ClientRequest::Unsubscribe {
            attendance_session_id,
        } => {
            engine.unsubscribe(peer.conn_id, attendance_session_id).await?;
            ResponseBody::Unsubscribed(attendance_session_id)
        }
    };
    Ok(body)
}

/// Staff may act for a named student; everyone else acts for themselves.
fn scoped_student(caller: &Caller, named: Option<StudentId>) -> StudentId {
    match named {
        Some(student) if caller.role.is_staff() => student,
        _ => caller.as_student(),
    }
}

/// Wraps a message in an envelope and sends it.
async fn send<A, C>(
    conn: &WebSocketConnection,
    state: &ServerState<A, C>,
    seq: u64,
    in_reply_to: Option<u64>,
    message: ServerMessage,
) -> Result<(), RollcallError>
where
    A: Authenticator,
    C: Codec,
{
    let envelope = ServerEnvelope {
        seq,
        timestamp: state.elapsed_ms(),
        in_reply_to,
        message,
    };
    let bytes = state.codec.encode(&envelope)?;
    conn.send(&bytes).await.map_err(RollcallError::Transport)?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
