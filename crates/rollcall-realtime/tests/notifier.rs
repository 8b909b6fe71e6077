//! Integration tests for the notifier actor.

use chrono::Utc;
use rollcall_protocol::{
    AttendanceSessionId, AttendanceStatus, CheckinSource, ConnectionId, SessionEvent,
    SessionStats, SessionStatus,
};
use rollcall_realtime::{Notifier, NotifierError, NotifierHandle, event_channel};

// =========================================================================
// Helpers
// =========================================================================

fn notifier() -> NotifierHandle {
    NotifierHandle::spawn(NotifierHandle::DEFAULT_CHANNEL_SIZE)
}

fn conn(n: u64) -> ConnectionId {
    ConnectionId::new(n)
}

// =========================================================================
// subscribe / broadcast
// =========================================================================

#[tokio::test]
async fn test_broadcast_reaches_only_that_sessions_subscribers() {
    let n = notifier();
    let (a, b) = (AttendanceSessionId::new(), AttendanceSessionId::new());
    let (tx1, mut rx1) = event_channel();
    let (tx2, mut rx2) = event_channel();
    n.subscribe(conn(1), a, tx1).await.unwrap();
    n.subscribe(conn(2), b, tx2).await.unwrap();

    let delivered = n
        .broadcast_token_rotated(a, "tok".into(), Utc::now())
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    match rx1.try_recv().unwrap() {
        SessionEvent::QrUpdated { attendance_session_id, token, .. } => {
            assert_eq!(attendance_session_id, a);
            assert_eq!(token, "tok");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn test_connection_may_hold_many_subscriptions() {
    let n = notifier();
    let (a, b) = (AttendanceSessionId::new(), AttendanceSessionId::new());
    let (tx, mut rx) = event_channel();
    n.subscribe(conn(1), a, tx.clone()).await.unwrap();
    n.subscribe(conn(1), b, tx).await.unwrap();

    n.broadcast_stats(a, SessionStats::default()).await.unwrap();
    n.broadcast_session_closed(b, SessionStatus::Closed, Utc::now())
        .await
        .unwrap();

    assert_eq!(rx.try_recv().unwrap().session_id(), a);
    assert_eq!(rx.try_recv().unwrap().session_id(), b);
}

#[tokio::test]
async fn test_subscribe_twice_delivers_once() {
    let n = notifier();
    let s = AttendanceSessionId::new();
    let (tx, mut rx) = event_channel();
    n.subscribe(conn(1), s, tx.clone()).await.unwrap();
    n.subscribe(conn(1), s, tx).await.unwrap();

    assert_eq!(n.subscriber_count(s).await.unwrap(), 1);
    n.broadcast_stats(s, SessionStats::default()).await.unwrap();
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_broadcast_without_subscribers_delivers_nothing() {
    let n = notifier();
    let delivered = n
        .broadcast_checkin(
            AttendanceSessionId::new(),
            "s-1".into(),
            AttendanceStatus::Present,
            Utc::now(),
            CheckinSource::Qr,
        )
        .await
        .unwrap();
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn test_events_arrive_in_broadcast_order() {
    let n = notifier();
    let s = AttendanceSessionId::new();
    let (tx, mut rx) = event_channel();
    n.subscribe(conn(1), s, tx).await.unwrap();

    for i in 0..5 {
        n.broadcast_token_rotated(s, format!("t{i}"), Utc::now())
            .await
            .unwrap();
    }
    for i in 0..5 {
        match rx.recv().await.unwrap() {
            SessionEvent::QrUpdated { token, .. } => assert_eq!(token, format!("t{i}")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

// =========================================================================
// unsubscribe / disconnect
// =========================================================================

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let n = notifier();
    let s = AttendanceSessionId::new();
    let (tx, mut rx) = event_channel();
    n.subscribe(conn(1), s, tx).await.unwrap();

    assert!(n.unsubscribe(conn(1), s).await.unwrap());
    assert!(!n.unsubscribe(conn(1), s).await.unwrap());

    n.broadcast_stats(s, SessionStats::default()).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_removes_every_subscription() {
    let n = notifier();
    let (a, b) = (AttendanceSessionId::new(), AttendanceSessionId::new());
    let (tx, _rx) = event_channel();
    let (other_tx, _other_rx) = event_channel();
    n.subscribe(conn(1), a, tx.clone()).await.unwrap();
    n.subscribe(conn(1), b, tx).await.unwrap();
    n.subscribe(conn(2), a, other_tx).await.unwrap();

    assert_eq!(n.disconnect(conn(1)).await.unwrap(), 2);
    assert_eq!(n.subscriber_count(a).await.unwrap(), 1);
    assert_eq!(n.subscriber_count(b).await.unwrap(), 0);
    assert_eq!(n.disconnect(conn(1)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_dropped_receiver_is_pruned_on_broadcast() {
    let n = notifier();
    let s = AttendanceSessionId::new();
    let (tx, rx) = event_channel();
    n.subscribe(conn(1), s, tx).await.unwrap();
    drop(rx);

    let delivered = n.broadcast_stats(s, SessionStats::default()).await.unwrap();
    assert_eq!(delivered, 0);
    assert_eq!(n.subscriber_count(s).await.unwrap(), 0);
}

// =========================================================================
// shutdown
// =========================================================================

#[tokio::test]
async fn test_calls_after_shutdown_are_unavailable() {
    let n = notifier();
    n.shutdown().await.unwrap();
    tokio::task::yield_now().await;

    let err = n
        .broadcast_stats(AttendanceSessionId::new(), SessionStats::default())
        .await
        .unwrap_err();
    assert!(matches!(err, NotifierError::Unavailable));
}
