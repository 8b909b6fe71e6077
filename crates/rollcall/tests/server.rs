//! Integration tests for the Rollcall gateway over a real socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rollcall::prelude::*;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a gateway on a random port over a fresh engine with one class:
/// meeting `cs-1` of class `c-1`, students `s-1` and `s-2`.
async fn start_server() -> String {
    start_server_with_idle(Duration::from_secs(60)).await
}

async fn start_server_with_idle(idle: Duration) -> String {
    let roster = InMemoryClassroom::new()
        .with_session("cs-1", "c-1")
        .with_students("c-1", ["s-1", "s-2"]);
    let engine = Arc::new(AttendanceEngine::builder().classroom(Arc::new(roster)).build());
    engine.start().await.expect("engine should start");

    let server = RollcallServerBuilder::new()
        .bind("127.0.0.1:0")
        .idle_timeout(idle)
        .build(engine, DevAuthenticator)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("should have local addr").to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, seq: u64, request: ClientRequest) {
    let bytes = serde_json::to_string(&ClientEnvelope { seq, request }).expect("encode");
    ws.send(Message::Text(bytes.into())).await.expect("send");
}

async fn next_envelope(ws: &mut ClientWs) -> ServerEnvelope {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("frame within 2s")
        .expect("stream open")
        .expect("frame");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

/// Sends a request and waits for its reply, skipping pushed events.
async fn call(ws: &mut ClientWs, seq: u64, request: ClientRequest) -> ServerMessage {
    send(ws, seq, request).await;
    loop {
        let env = next_envelope(ws).await;
        if env.in_reply_to == Some(seq) {
            return env.message;
        }
    }
}

/// Waits for the next pushed event, skipping replies.
async fn next_event(ws: &mut ClientWs) -> SessionEvent {
    loop {
        if let ServerMessage::Event { event } = next_envelope(ws).await.message {
            return event;
        }
    }
}

async fn handshake(ws: &mut ClientWs, token: &str) -> ServerMessage {
    call(
        ws,
        0,
        ClientRequest::Handshake {
            version: PROTOCOL_VERSION,
            token: Some(token.into()),
        },
    )
    .await
}

async fn connect_as(addr: &str, token: &str) -> ClientWs {
    let mut ws = connect(addr).await;
    let ack = handshake(&mut ws, token).await;
    assert!(matches!(ack, ServerMessage::HandshakeAck { .. }), "got {ack:?}");
    ws
}

fn expect_body(message: ServerMessage) -> ResponseBody {
    match message {
        ServerMessage::Response { body } => body,
        other => panic!("expected Response, got {other:?}"),
    }
}

fn expect_error_code(message: ServerMessage) -> u16 {
    match message {
        ServerMessage::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

async fn open_qr_session(ws: &mut ClientWs, seq: u64) -> AttendanceSession {
    let req = OpenSessionRequest::new("cs-1", AttendanceMethod::Qr);
    match expect_body(call(ws, seq, ClientRequest::OpenSession(req)).await) {
        ResponseBody::Session(session) => session,
        other => panic!("expected Session, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_success_returns_caller() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    match handshake(&mut ws, "teacher:t-1").await {
        ServerMessage::HandshakeAck { user_id, role, .. } => {
            assert_eq!(user_id, UserId::from("t-1"));
            assert_eq!(role, Role::Teacher);
        }
        other => panic!("expected HandshakeAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_version_mismatch_rejected() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let reply = call(
        &mut ws,
        0,
        ClientRequest::Handshake {
            version: 999,
            token: Some("teacher:t-1".into()),
        },
    )
    .await;
    assert_eq!(expect_error_code(reply), 400);
}

#[tokio::test]
async fn test_handshake_bad_token_unauthorized() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let reply = handshake(&mut ws, "nobody").await;
    assert_eq!(expect_error_code(reply), 401);
}

#[tokio::test]
async fn test_handshake_non_handshake_first_message_rejected() {
    let addr = start_server().await;
    let mut ws = connect(&addr).await;

    let reply = call(&mut ws, 0, ClientRequest::Heartbeat { client_time: 0 }).await;
    assert_eq!(expect_error_code(reply), 400);
}

// =========================================================================
// Connection lifecycle
// =========================================================================

#[tokio::test]
async fn test_heartbeat_echoes_client_time() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "student:s-1").await;

    match call(&mut ws, 1, ClientRequest::Heartbeat { client_time: 12345 }).await {
        ServerMessage::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 12345),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_envelope_ignored() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "student:s-1").await;

    ws.send(Message::Text("not json".into())).await.expect("send");

    let reply = call(&mut ws, 1, ClientRequest::Heartbeat { client_time: 999 }).await;
    assert!(matches!(reply, ServerMessage::HeartbeatAck { .. }));
}

#[tokio::test]
async fn test_disconnect_closes_connection() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "student:s-1").await;

    send(
        &mut ws,
        1,
        ClientRequest::Disconnect {
            reason: "bye".into(),
        },
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match result {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_idle_timeout_reset_by_pushed_events() {
    let addr = start_server_with_idle(Duration::from_millis(400)).await;
    let mut admin = connect_as(&addr, "admin:a-1").await;
    let id = open_qr_session(&mut admin, 1).await.id;
    let record_id = match expect_body(
        call(
            &mut admin,
            2,
            ClientRequest::ListRecords {
                attendance_session_id: id,
            },
        )
        .await,
    ) {
        ResponseBody::Records(records) => records[0].id,
        other => panic!("expected Records, got {other:?}"),
    };

    let mut dashboard = connect_as(&addr, "teacher:t-1").await;
    let body = expect_body(
        call(
            &mut dashboard,
            1,
            ClientRequest::Subscribe {
                attendance_session_id: id,
            },
        )
        .await,
    );
    assert_eq!(body, ResponseBody::Subscribed(id));

    // The dashboard only listens; the admin keeps the stats moving.
    let statuses = [AttendanceStatus::Late, AttendanceStatus::Absent];
    for round in 0..8u64 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let status = statuses[(round % 2) as usize];
        call(
            &mut admin,
            3 + round,
            ClientRequest::UpdateRecordStatus {
                record_id,
                status,
                note: None,
            },
        )
        .await;
        assert!(matches!(
            next_event(&mut dashboard).await,
            SessionEvent::StatsUpdated { .. }
        ));
    }

    // With the pushes stopped the dashboard goes idle and is dropped.
    let result = tokio::time::timeout(Duration::from_secs(2), dashboard.next()).await;
    match result {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_handshake_rejected() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "student:s-1").await;

    let reply = handshake(&mut ws, "admin:a-1").await;
    assert_eq!(expect_error_code(reply), 400);
}

// =========================================================================
// Requests
// =========================================================================

#[tokio::test]
async fn test_student_staff_operation_forbidden() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "student:s-1").await;

    let req = OpenSessionRequest::new("cs-1", AttendanceMethod::Qr);
    let reply = call(&mut ws, 1, ClientRequest::OpenSession(req)).await;
    match reply {
        ServerMessage::Error { code, kind, .. } => {
            assert_eq!(code, 403);
            assert_eq!(kind, ErrorKind::Forbidden);
        }
        other => panic!("expected Error 403, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_session_unknown_ref_not_found() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "teacher:t-1").await;

    let req = OpenSessionRequest::new("cs-404", AttendanceMethod::Qr);
    let reply = call(&mut ws, 1, ClientRequest::OpenSession(req)).await;
    assert_eq!(expect_error_code(reply), 404);
}

#[tokio::test]
async fn test_open_session_twice_conflict() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "teacher:t-1").await;

    let session = open_qr_session(&mut ws, 1).await;
    assert_eq!(session.opened_by, UserId::from("t-1"));

    let req = OpenSessionRequest::new("cs-1", AttendanceMethod::Qr);
    let reply = call(&mut ws, 2, ClientRequest::OpenSession(req)).await;
    assert_eq!(expect_error_code(reply), 409);
}

#[tokio::test]
async fn test_subscribe_unknown_session_not_found() {
    let addr = start_server().await;
    let mut ws = connect_as(&addr, "teacher:t-1").await;

    let reply = call(
        &mut ws,
        1,
        ClientRequest::Subscribe {
            attendance_session_id: AttendanceSessionId::new(),
        },
    )
    .await;
    assert_eq!(expect_error_code(reply), 404);
}

#[tokio::test]
async fn test_qr_checkin_pushes_events_to_subscriber() {
    let addr = start_server().await;
    let mut teacher = connect_as(&addr, "teacher:t-1").await;
    let session = open_qr_session(&mut teacher, 1).await;
    let id = session.id;

    let body = expect_body(
        call(
            &mut teacher,
            2,
            ClientRequest::Subscribe {
                attendance_session_id: id,
            },
        )
        .await,
    );
    assert_eq!(body, ResponseBody::Subscribed(id));

    let qr = match expect_body(
        call(
            &mut teacher,
            3,
            ClientRequest::GetQr {
                attendance_session_id: id,
            },
        )
        .await,
    ) {
        ResponseBody::Qr(Some(qr)) => qr,
        other => panic!("expected a live QR, got {other:?}"),
    };
    assert!(qr.checkin_url.ends_with(&format!("/checkin?token={}", qr.token)));

    // Student registers a phone and scans.
    let mut student = connect_as(&addr, "student:s-1").await;
    let device = DeviceId::from("phone-1");
    let reg = call(
        &mut student,
        1,
        ClientRequest::RegisterDevice {
            device_id: device.clone(),
            meta: DeviceMeta::default(),
        },
    )
    .await;
    assert!(matches!(expect_body(reg), ResponseBody::Device(_)));

    let evidence = CheckinEvidence {
        qr_token: Some(qr.token.clone()),
        device_id: Some(device.clone()),
        ..CheckinEvidence::default()
    };
    let record = match expect_body(
        call(
            &mut student,
            2,
            ClientRequest::Checkin {
                attendance_session_id: id,
                evidence: evidence.clone(),
            },
        )
        .await,
    ) {
        ResponseBody::Record(record) => record,
        other => panic!("expected Record, got {other:?}"),
    };
    assert_eq!(record.student_id, StudentId::from("s-1"));
    assert_eq!(record.status, AttendanceStatus::Present);

    match next_event(&mut teacher).await {
        SessionEvent::StudentCheckedIn { student_id, status, .. } => {
            assert_eq!(student_id, StudentId::from("s-1"));
            assert_eq!(status, AttendanceStatus::Present);
        }
        other => panic!("expected StudentCheckedIn, got {other:?}"),
    }
    match next_event(&mut teacher).await {
        SessionEvent::StatsUpdated { stats, .. } => {
            assert_eq!(stats.total, 2);
            assert_eq!(stats.present, 1);
            assert_eq!(stats.absent, 1);
        }
        other => panic!("expected StatsUpdated, got {other:?}"),
    }

    // A second scan is a conflict.
    let again = call(
        &mut student,
        3,
        ClientRequest::Checkin {
            attendance_session_id: id,
            evidence,
        },
    )
    .await;
    assert_eq!(expect_error_code(again), 409);
}

#[tokio::test]
async fn test_close_session_pushes_session_closed() {
    let addr = start_server().await;
    let mut teacher = connect_as(&addr, "teacher:t-1").await;
    let id = open_qr_session(&mut teacher, 1).await.id;
    call(
        &mut teacher,
        2,
        ClientRequest::Subscribe {
            attendance_session_id: id,
        },
    )
    .await;

    let closed = expect_body(
        call(
            &mut teacher,
            3,
            ClientRequest::CloseSession {
                attendance_session_id: id,
            },
        )
        .await,
    );
    match closed {
        ResponseBody::Session(session) => assert_eq!(session.status, SessionStatus::Closed),
        other => panic!("expected Session, got {other:?}"),
    }
    match next_event(&mut teacher).await {
        SessionEvent::SessionClosed { status, .. } => assert_eq!(status, SessionStatus::Closed),
        other => panic!("expected SessionClosed, got {other:?}"),
    }

    let qr = expect_body(
        call(
            &mut teacher,
            4,
            ClientRequest::GetQr {
                attendance_session_id: id,
            },
        )
        .await,
    );
    assert_eq!(qr, ResponseBody::Qr(None));
}

#[tokio::test]
async fn test_student_records_scoped_to_caller() {
    let addr = start_server().await;
    let mut teacher = connect_as(&addr, "teacher:t-1").await;
    let id = open_qr_session(&mut teacher, 1).await.id;

    let marked = call(
        &mut teacher,
        2,
        ClientRequest::ManualCheckin {
            attendance_session_id: id,
            student_id: StudentId::from("s-2"),
            note: Some("arrived with a pass".into()),
        },
    )
    .await;
    match expect_body(marked) {
        ResponseBody::Record(record) => {
            assert_eq!(record.marked_by, Some(UserId::from("t-1")));
        }
        other => panic!("expected Record, got {other:?}"),
    }

    // s-1 asking for s-2's records still gets their own.
    let mut student = connect_as(&addr, "student:s-1").await;
    let reply = call(
        &mut student,
        1,
        ClientRequest::StudentRecords {
            student_id: Some(StudentId::from("s-2")),
            class_id: None,
        },
    )
    .await;
    match expect_body(reply) {
        ResponseBody::Records(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].student_id, StudentId::from("s-1"));
            assert_eq!(records[0].status, AttendanceStatus::Absent);
        }
        other => panic!("expected Records, got {other:?}"),
    }
}
