use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamui_core::{Envelope, ReconnectPolicy};
use streamui_transport::{ConnectionState, Transport, TransportError, WebSocketTransport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Greets every connection with a control frame and answers each text frame
/// with a `message` envelope carrying the same payload. When `drop_first` is
/// set the first connection is closed right after the greeting.
async fn spawn_peer(drop_first: bool) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                let hello = json!({"type": "control", "payload": {"connection": index}});
                ws.send(Message::Text(hello.to_string())).await.unwrap();
                if drop_first && index == 0 {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(text) => {
                            let inbound: Value = serde_json::from_str(&text).unwrap();
                            let reply = json!({"type": "message", "payload": inbound["payload"]});
                            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), accepted)
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        base_delay: 10,
        max_delay: 100,
        jitter: 0.0,
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn test_open_send_receive_close() {
    let (url, _) = spawn_peer(false).await;
    let transport = WebSocketTransport::new(url, fast_policy(0));

    let states = Arc::new(Mutex::new(Vec::new()));
    let recorded = states.clone();
    transport
        .events()
        .on_state_change(move |state| recorded.lock().push(state));
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_control(move |env| control_tx.send(env.clone()).unwrap());
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_message(move |env| message_tx.send(env.clone()).unwrap());

    transport.open().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Open);
    assert_eq!(next(&mut control_rx).await.payload, json!({"connection": 0}));

    transport
        .send(&Envelope::new("user_message", json!({"text": "hi"})))
        .await
        .unwrap();
    let echoed = next(&mut message_rx).await;
    assert_eq!(echoed.kind, "message");
    assert_eq!(echoed.payload, json!({"text": "hi"}));

    transport.close().await;
    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed
        ]
    );
    assert_eq!(
        transport.send(&Envelope::message(json!([]))).await,
        Err(TransportError::Closed)
    );
}

#[tokio::test]
async fn test_sends_before_open_are_flushed_in_order() {
    let (url, _) = spawn_peer(false).await;
    let transport = WebSocketTransport::new(url, fast_policy(0));
    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_message(move |env| message_tx.send(env.payload.clone()).unwrap());

    for n in 0..3 {
        transport
            .send(&Envelope::new("user_message", json!(n)))
            .await
            .unwrap();
    }
    assert_eq!(transport.queued(), 3);

    transport.open().await.unwrap();
    for n in 0..3 {
        assert_eq!(next(&mut message_rx).await, json!(n));
    }
    assert_eq!(transport.queued(), 0);
    transport.close().await;
}

#[tokio::test]
async fn test_queue_is_bounded() {
    let transport = WebSocketTransport::with_bus(
        "ws://127.0.0.1:9",
        fast_policy(0),
        1,
        Arc::new(streamui_transport::EventBus::new()),
    );
    transport.send(&Envelope::message(json!(1))).await.unwrap();
    assert_eq!(
        transport.send(&Envelope::message(json!(2))).await,
        Err(TransportError::QueueFull(1))
    );
}

#[tokio::test]
async fn test_close_discards_and_reports_unsent_frames() {
    let transport = WebSocketTransport::new("ws://127.0.0.1:9", fast_policy(0));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    transport
        .events()
        .on_error(move |error| sink.lock().push(error.clone()));

    transport.send(&Envelope::message(json!(1))).await.unwrap();
    transport.send(&Envelope::message(json!(2))).await.unwrap();
    assert_eq!(transport.queued(), 2);

    transport.close().await;
    assert_eq!(transport.queued(), 0);
    assert_eq!(*errors.lock(), vec![TransportError::Discarded(2)]);
}

#[tokio::test]
async fn test_reconnects_after_peer_drop() {
    let (url, accepted) = spawn_peer(true).await;
    let transport = WebSocketTransport::new(url, fast_policy(3));
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    transport
        .events()
        .on_control(move |env| control_tx.send(env.payload.clone()).unwrap());

    transport.open().await.unwrap();
    assert_eq!(next(&mut control_rx).await, json!({"connection": 0}));
    assert_eq!(next(&mut control_rx).await, json!({"connection": 1}));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    timeout(Duration::from_secs(5), async {
        while transport.state() != ConnectionState::Open {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    transport.close().await;
}
