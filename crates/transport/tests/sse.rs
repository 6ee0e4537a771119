use serde_json::{json, Value};
use std::time::Duration;
use streamui_core::{Envelope, ReconnectPolicy, SseEndpoints};
use streamui_transport::{
    AutoTransport, ConnectionState, SseTransport, Transport, TransportError, TransportKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const EVENTS: &str = "event: patch\n\
data: {\"op\":\"add\",\"value\":{\"component\":\"text\",\"id\":\"t1\",\"text\":\"hi\"}}\n\n\
: keepalive\n\n\
data: {\"type\":\"message\",\"payload\":[{\"component\":\"divider\"}]}\n\n";

/// Reads one request; returns the request head and body.
async fn read_request(socket: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return (String::from_utf8_lossy(&buffer).to_string(), Vec::new());
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let mut body = buffer[end + 4..].to_vec();
            while body.len() < length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
            return (head, body);
        }
    }
}

/// Serves `GET /stream` as an event stream that stays open, and forwards
/// `POST /send` bodies to the returned channel.
async fn spawn_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let sent_tx = sent_tx.clone();
            tokio::spawn(async move {
                let (head, body) = read_request(&mut socket).await;
                let request_line = head.lines().next().unwrap_or_default().to_string();
                if request_line.starts_with("GET /stream") {
                    let headers = "HTTP/1.1 200 OK\r\n\
                        Content-Type: text/event-stream\r\n\
                        Cache-Control: no-cache\r\n\r\n";
                    socket.write_all(headers.as_bytes()).await.unwrap();
                    socket.write_all(EVENTS.as_bytes()).await.unwrap();
                    socket.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                } else if request_line.starts_with("POST /send") {
                    let value: Value = serde_json::from_slice(&body).unwrap();
                    sent_tx.send(value).unwrap();
                    let response = "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n";
                    socket.write_all(response.as_bytes()).await.unwrap();
                } else {
                    let response =
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
                    socket.write_all(response.as_bytes()).await.unwrap();
                }
            });
        }
    });

    (base, sent_rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn test_stream_frames_are_classified() {
    let (base, mut sent) = spawn_server().await;
    let transport = SseTransport::new(format!("{}/stream", base), Some(format!("{}/send", base)));

    let (patch_tx, mut patch_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_patch(move |env| patch_tx.send(env.clone()).unwrap());
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_message(move |env| message_tx.send(env.clone()).unwrap());

    transport.open().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Open);

    let patch = next(&mut patch_rx).await;
    assert_eq!(patch.kind, "patch");
    assert_eq!(patch.payload["value"]["id"], json!("t1"));

    let message = next(&mut message_rx).await;
    assert_eq!(message.payload, json!([{"component": "divider"}]));

    transport
        .send(&Envelope::new("user_message", json!({"text": "hello"})).with_id("u1"))
        .await
        .unwrap();
    assert_eq!(
        next(&mut sent).await,
        json!({"type": "user_message", "payload": {"text": "hello"}, "id": "u1"})
    );

    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(
        transport.send(&Envelope::message(json!([]))).await,
        Err(TransportError::NotOpen)
    );
}

#[tokio::test]
async fn test_missing_stream_is_a_connect_error() {
    let (base, _) = spawn_server().await;
    let transport = SseTransport::with_bus(
        format!("{}/missing", base),
        None,
        ReconnectPolicy::never(),
        std::sync::Arc::new(streamui_transport::EventBus::new()),
    );
    let result = transport.open().await;
    assert!(matches!(result, Err(TransportError::Connect { .. })));
}

#[tokio::test]
async fn test_send_without_endpoint_is_unsupported() {
    let (base, _) = spawn_server().await;
    let transport = SseTransport::new(format!("{}/stream", base), None);
    transport.open().await.unwrap();
    assert_eq!(
        transport.send(&Envelope::message(json!([]))).await,
        Err(TransportError::SendUnsupported)
    );
    transport.close().await;
}

#[tokio::test]
async fn test_auto_falls_back_to_sse() {
    let (base, mut sent) = spawn_server().await;
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", dead.local_addr().unwrap());
    drop(dead);

    let transport = AutoTransport::new(
        ws_url,
        SseEndpoints {
            stream_url: format!("{}/stream", base),
            send_url: Some(format!("{}/send", base)),
        },
        ReconnectPolicy::default(),
        8,
    );
    let (patch_tx, mut patch_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_patch(move |env| patch_tx.send(env.clone()).unwrap());

    transport.open().await.unwrap();
    assert_eq!(transport.active_kind(), TransportKind::Sse);
    assert_eq!(transport.kind(), TransportKind::Sse);
    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(next(&mut patch_rx).await.kind, "patch");

    transport
        .send(&Envelope::new("user_message", json!("ping")))
        .await
        .unwrap();
    assert_eq!(next(&mut sent).await["payload"], json!("ping"));

    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_auto_fallback_resends_queued_frames() {
    let (base, mut sent) = spawn_server().await;
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", dead.local_addr().unwrap());
    drop(dead);

    let transport = AutoTransport::new(
        ws_url,
        SseEndpoints {
            stream_url: format!("{}/stream", base),
            send_url: Some(format!("{}/send", base)),
        },
        ReconnectPolicy::default(),
        8,
    );
    for text in ["early", "also early"] {
        transport
            .send(&Envelope::new("user_message", json!(text)))
            .await
            .unwrap();
    }

    transport.open().await.unwrap();
    assert_eq!(transport.active_kind(), TransportKind::Sse);
    assert_eq!(next(&mut sent).await["payload"], json!("early"));
    assert_eq!(next(&mut sent).await["payload"], json!("also early"));

    transport.close().await;
}
