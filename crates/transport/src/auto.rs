use crate::error::TransportError;
use crate::events::EventBus;
use crate::sse::SseTransport;
use crate::state::{ConnectionState, TransportKind};
use crate::traits::Transport;
use crate::websocket::WebSocketTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use streamui_core::{Envelope, ReconnectPolicy, SseEndpoints};

/// Tries the WebSocket binding first and falls back to SSE, for good, if the
/// first WebSocket attempt fails. Both bindings share one event bus so
/// subscriptions made before the fallback keep working.
pub struct AutoTransport {
    ws: WebSocketTransport,
    sse: SseTransport,
    active: RwLock<TransportKind>,
}

impl AutoTransport {
    pub fn new(
        ws_url: impl Into<String>,
        sse: SseEndpoints,
        policy: ReconnectPolicy,
        send_queue_limit: usize,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            ws: WebSocketTransport::with_bus(ws_url, policy.clone(), send_queue_limit, bus.clone()),
            sse: SseTransport::with_bus(sse.stream_url, sse.send_url, policy, bus),
            active: RwLock::new(TransportKind::Websocket),
        }
    }

    pub fn active_kind(&self) -> TransportKind {
        *self.active.read()
    }

    fn active(&self) -> &dyn Transport {
        match self.active_kind() {
            TransportKind::Websocket => &self.ws,
            TransportKind::Sse => &self.sse,
        }
    }
}

#[async_trait]
impl Transport for AutoTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.active_kind() == TransportKind::Sse {
            return self.sse.open().await;
        }

        match self.ws.open().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("WebSocket unavailable ({}); falling back to SSE", e);
                let pending = self.ws.abandon();
                *self.active.write() = TransportKind::Sse;
                if let Err(e) = self.sse.open().await {
                    if !pending.is_empty() {
                        self.events()
                            .emit_error(&TransportError::Discarded(pending.len()));
                    }
                    return Err(e);
                }
                for envelope in pending {
                    if let Err(e) = self.sse.send(&envelope).await {
                        tracing::warn!("Queued '{}' frame lost in fallback: {}", envelope.kind, e);
                        self.events().emit_error(&e);
                    }
                }
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.active().close().await;
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.active().send(envelope).await
    }

    fn state(&self) -> ConnectionState {
        self.active().state()
    }

    fn events(&self) -> &Arc<EventBus> {
        self.ws.events()
    }

    fn kind(&self) -> TransportKind {
        self.active_kind()
    }
}
