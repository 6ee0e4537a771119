use crate::error::TransportError;
use crate::events::{decode_frame, EventBus};
use crate::state::{ConnectionState, TransportKind};
use crate::supervisor::{Link, Session, Supervisor};
use crate::traits::Transport;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use streamui_core::{Envelope, ReconnectPolicy};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` parser. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
        })
    }
}

struct SseLink {
    client: Client,
    stream_url: String,
    bus: Arc<EventBus>,
}

#[async_trait]
impl Link for SseLink {
    async fn connect(&self) -> Result<Session, TransportError> {
        let response = self
            .client
            .get(&self.stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: self.stream_url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TransportError::Connect {
                url: self.stream_url.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let mut body = response.bytes_stream();
        let bus = self.bus.clone();
        let session = async move {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| TransportError::Stream(e.to_string()))?;
                for frame in decoder.feed(&chunk) {
                    let envelope = decode_frame(&frame.data, frame.event.as_deref());
                    bus.dispatch(&envelope);
                }
            }
            Ok::<(), TransportError>(())
        };
        Ok(session.boxed())
    }
}

/// Push binding: inbound frames over a server-sent event stream, outbound
/// envelopes POSTed to a separate endpoint. Sends are only accepted while
/// the stream is open.
pub struct SseTransport {
    supervisor: Arc<Supervisor>,
    link: Arc<SseLink>,
    send_url: Option<String>,
}

impl SseTransport {
    pub fn new(stream_url: impl Into<String>, send_url: Option<String>) -> Self {
        Self::with_bus(
            stream_url,
            send_url,
            ReconnectPolicy::default(),
            Arc::new(EventBus::new()),
        )
    }

    pub fn with_bus(
        stream_url: impl Into<String>,
        send_url: Option<String>,
        policy: ReconnectPolicy,
        bus: Arc<EventBus>,
    ) -> Self {
        let link = Arc::new(SseLink {
            client: Client::new(),
            stream_url: stream_url.into(),
            bus: bus.clone(),
        });
        Self {
            supervisor: Supervisor::new(bus, policy),
            link,
            send_url,
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.link.stream_url
    }

    pub fn send_url(&self) -> Option<&str> {
        self.send_url.as_deref()
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self) -> Result<(), TransportError> {
        tracing::info!("Opening SSE transport to {}", self.link.stream_url);
        self.supervisor.open(self.link.clone()).await
    }

    async fn close(&self) {
        self.supervisor.close(self.link.as_ref());
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.supervisor.state().is_open() {
            return Err(TransportError::NotOpen);
        }
        let send_url = self
            .send_url
            .as_deref()
            .ok_or(TransportError::SendUnsupported)?;

        let response = self
            .link
            .client
            .post(send_url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Send(format!("{}: {}", status, text)));
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    fn events(&self) -> &Arc<EventBus> {
        self.supervisor.bus()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}
