use async_trait::async_trait;
use civicsync_sync::{
    ChannelState, CollectionSnapshot, FixedDelay, PushConnection, PushConnector, PushHandler,
    ReconnectingChannel, SnapshotSource, WsConnector,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_feed(frames: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    spawn_message_feed(frames.into_iter().map(Message::Text).collect()).await
}

/// Accepts one WebSocket connection, reports the first client frame, then
/// sends `messages` and keeps the connection open until the client leaves.
async fn spawn_message_feed(
    messages: Vec<Message>,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(init))) = ws.next().await {
            let _ = tx.send(init.to_string());
        }
        for message in messages {
            ws.send(message).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    (format!("ws://{addr}/feed"), rx)
}

struct ForwardingHandler {
    tx: mpsc::UnboundedSender<CollectionSnapshot>,
}

#[async_trait]
impl PushHandler for ForwardingHandler {
    async fn on_push(&self, snapshot: CollectionSnapshot) {
        let _ = self.tx.send(snapshot);
    }
}

#[tokio::test]
async fn connection_round_trip() {
    let (url, mut inits) = spawn_feed(vec![json!([{ "id": "x" }]).to_string()]).await;

    let mut connection = WsConnector.connect(&url).await.unwrap();
    connection.send(r#"{"type":"INIT"}"#.to_string()).await.unwrap();

    assert_eq!(inits.recv().await.unwrap(), r#"{"type":"INIT"}"#);
    let frame = connection.recv().await.unwrap().unwrap();
    assert!(frame.contains("\"x\""));
}

#[tokio::test]
async fn binary_frames_must_be_utf8() {
    let (url, mut inits) = spawn_message_feed(vec![
        Message::Binary(vec![0xff, 0xfe, b'[', b']']),
        Message::Binary(br#"[{"id":"b"}]"#.to_vec()),
    ])
    .await;

    let mut connection = WsConnector.connect(&url).await.unwrap();
    connection.send(r#"{"type":"INIT"}"#.to_string()).await.unwrap();
    inits.recv().await.unwrap();

    let frame = connection.recv().await.unwrap().unwrap();
    assert_eq!(frame, r#"[{"id":"b"}]"#);
}

#[tokio::test]
async fn channel_receives_pushes_over_websocket() {
    let frames = vec![
        "garbage".to_string(),
        json!({ "items": [{ "id": "dev-1" }, { "id": "dev-2" }] }).to_string(),
    ];
    let (url, mut inits) = spawn_feed(frames).await;
    let (tx, mut pushes) = mpsc::unbounded_channel();

    let channel = ReconnectingChannel::new(
        url,
        Arc::new(WsConnector),
        Arc::new(FixedDelay::default()),
        Arc::new(ForwardingHandler { tx }),
    );
    channel.start();

    let init = tokio::time::timeout(Duration::from_secs(5), inits.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(init.contains("INIT"));

    let snapshot = tokio::time::timeout(Duration::from_secs(5), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.source, SnapshotSource::Push);
    assert_eq!(snapshot.len(), 2);
    assert_eq!(channel.state(), ChannelState::Open);

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = WsConnector.connect(&format!("ws://127.0.0.1:{port}/feed")).await;
    assert!(result.is_err());
}
