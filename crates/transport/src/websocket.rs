use crate::error::TransportError;
use crate::events::EventBus;
use crate::state::{ConnectionState, TransportKind};
use crate::supervisor::{Link, Session, Supervisor};
use crate::traits::Transport;
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use streamui_core::{Envelope, ReconnectPolicy};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const DEFAULT_SEND_QUEUE_LIMIT: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound side of the socket. Frames sent while not live are queued up to
/// `limit` and flushed in order when the connection comes up.
struct Outbox {
    live: bool,
    writer: Option<mpsc::UnboundedSender<Message>>,
    queued: VecDeque<Envelope>,
    limit: usize,
}

struct WsLink {
    url: String,
    bus: Arc<EventBus>,
    outbox: Mutex<Outbox>,
    pending_writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

#[async_trait]
impl Link for WsLink {
    async fn connect(&self) -> Result<Session, TransportError> {
        let (stream, response) = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Connect {
                url: self.url.clone(),
                reason: "connect timeout".to_string(),
            })?
            .map_err(|e| TransportError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!("WebSocket handshake with {} -> {}", self.url, response.status());

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.pending_writer.lock() = Some(tx);
        let bus = self.bus.clone();

        let session = async move {
            loop {
                tokio::select! {
                    inbound = source.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            bus.dispatch_text(&text, None);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            bus.dispatch_text(&String::from_utf8_lossy(&data), None);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            sink.send(Message::Pong(data))
                                .await
                                .map_err(|e| TransportError::Stream(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => return Ok::<(), TransportError>(()),
                        Some(Err(e)) => return Err(TransportError::Stream(e.to_string())),
                    },
                    outbound = rx.recv() => match outbound {
                        Some(message) => {
                            sink.send(message)
                                .await
                                .map_err(|e| TransportError::Stream(e.to_string()))?;
                        }
                        None => return Ok(()),
                    },
                }
            }
        };
        Ok(session.boxed())
    }

    fn opened(&self) {
        let Some(writer) = self.pending_writer.lock().take() else {
            return;
        };
        let mut outbox = self.outbox.lock();
        let flushed = outbox.queued.len();
        while let Some(envelope) = outbox.queued.pop_front() {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping queued '{}' frame: {}", envelope.kind, e);
                    continue;
                }
            };
            if writer.send(Message::Text(text)).is_err() {
                break;
            }
        }
        if flushed > 0 {
            tracing::debug!("Flushed {} queued frames", flushed);
        }
        outbox.writer = Some(writer);
        outbox.live = true;
    }

    fn dropped(&self) {
        self.pending_writer.lock().take();
        let mut outbox = self.outbox.lock();
        outbox.live = false;
        outbox.writer = None;
    }
}

impl WsLink {
    fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut outbox = self.outbox.lock();
        if outbox.live {
            if let Some(writer) = &outbox.writer {
                let text = serde_json::to_string(envelope)?;
                return writer
                    .send(Message::Text(text))
                    .map_err(|_| TransportError::NotOpen);
            }
        }
        if outbox.queued.len() >= outbox.limit {
            return Err(TransportError::QueueFull(outbox.queued.len()));
        }
        outbox.queued.push_back(envelope.clone());
        Ok(())
    }

    fn take_queued(&self) -> Vec<Envelope> {
        self.outbox.lock().queued.drain(..).collect()
    }
}

/// Full-duplex binding over a persistent WebSocket connection.
pub struct WebSocketTransport {
    supervisor: Arc<Supervisor>,
    link: Arc<WsLink>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::with_bus(url, policy, DEFAULT_SEND_QUEUE_LIMIT, Arc::new(EventBus::new()))
    }

    pub fn with_bus(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        send_queue_limit: usize,
        bus: Arc<EventBus>,
    ) -> Self {
        let link = Arc::new(WsLink {
            url: url.into(),
            bus: bus.clone(),
            outbox: Mutex::new(Outbox {
                live: false,
                writer: None,
                queued: VecDeque::new(),
                limit: send_queue_limit,
            }),
            pending_writer: Mutex::new(None),
        });
        Self {
            supervisor: Supervisor::new(bus, policy),
            link,
        }
    }

    pub fn url(&self) -> &str {
        &self.link.url
    }

    /// Frames waiting for the connection to come up.
    pub fn queued(&self) -> usize {
        self.link.outbox.lock().queued.len()
    }

    /// Stops for good without emitting state changes and hands back the
    /// frames that never went out.
    pub(crate) fn abandon(&self) -> Vec<Envelope> {
        self.supervisor.abandon(self.link.as_ref());
        self.link.take_queued()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<(), TransportError> {
        tracing::info!("Opening WebSocket transport to {}", self.link.url);
        self.supervisor.open(self.link.clone()).await
    }

    async fn close(&self) {
        self.supervisor.close(self.link.as_ref());
        let discarded = self.link.take_queued().len();
        if discarded > 0 {
            tracing::warn!("Closed with {} unsent frames", discarded);
            self.supervisor
                .bus()
                .emit_error(&TransportError::Discarded(discarded));
        }
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.supervisor.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        self.link.send_envelope(envelope)
    }

    fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    fn events(&self) -> &Arc<EventBus> {
        self.supervisor.bus()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }
}
