//! Integration tests for the WebSocket transport over a real socket.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use rollcall_transport::{Connection, Transport, WebSocketConnection, WebSocketTransport};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    /// Binds port 0, connects one client, returns both ends.
    async fn pair() -> (WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        (server.await.expect("accept task"), client)
    }

    #[tokio::test]
    async fn test_websocket_send_and_receive_both_ways() {
        let (conn, mut client) = pair().await;
        assert!(conn.id().into_inner() > 0);
        assert!(conn.peer_addr().is_some());

        conn.send(br#"{"hello":"client"}"#).await.expect("send");
        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_text());
        assert_eq!(msg.into_data().as_ref(), br#"{"hello":"client"}"#);

        client
            .send(Message::Text(r#"{"hello":"server"}"#.into()))
            .await
            .unwrap();
        let received = conn.recv().await.expect("recv").expect("frame");
        assert_eq!(received, br#"{"hello":"server"}"#);

        conn.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_websocket_send_not_blocked_by_pending_recv() {
        let (conn, mut client) = pair().await;
        let conn = std::sync::Arc::new(conn);

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), conn.send(b"event"))
            .await
            .expect("send completed while recv was pending")
            .expect("send");
        assert_eq!(client.next().await.unwrap().unwrap().into_data().as_ref(), b"event");

        client.send(Message::Close(None)).await.unwrap();
        assert!(reader.await.unwrap().expect("recv").is_none());
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (conn, mut client) = pair().await;
        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none());
    }
}
