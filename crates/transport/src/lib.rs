//! Logical message channel over WebSocket or server-sent events, with
//! reconnect backoff and categorized inbound event delivery.

pub mod auto;
pub mod error;
pub mod events;
pub mod sse;
pub mod state;
mod supervisor;
pub mod traits;
pub mod websocket;

pub use auto::AutoTransport;
pub use error::TransportError;
pub use events::{classify, decode_frame, EventBus, EventCategory, SubscriptionId};
pub use sse::{SseDecoder, SseFrame, SseTransport};
pub use state::{ConnectionState, TransportKind};
pub use traits::Transport;
pub use websocket::{WebSocketTransport, DEFAULT_SEND_QUEUE_LIMIT};

use std::sync::Arc;
use streamui_core::TransportOptions;

/// Builds the binding described by `options` after validating its endpoints.
pub fn build_transport(
    options: &TransportOptions,
    send_queue_limit: usize,
) -> Result<Arc<dyn Transport>, TransportError> {
    options.validate()?;
    let policy = options.reconnect_policy();

    let transport: Arc<dyn Transport> = match options {
        TransportOptions::Websocket { url, .. } => Arc::new(WebSocketTransport::with_bus(
            url.clone(),
            policy,
            send_queue_limit,
            Arc::new(EventBus::new()),
        )),
        TransportOptions::Sse {
            stream_url,
            send_url,
        } => Arc::new(SseTransport::with_bus(
            stream_url.clone(),
            send_url.clone(),
            policy,
            Arc::new(EventBus::new()),
        )),
        TransportOptions::Auto { ws_url, sse, .. } => Arc::new(AutoTransport::new(
            ws_url.clone(),
            sse.clone(),
            policy,
            send_queue_limit,
        )),
    };
    tracing::debug!("Built {} transport", transport.kind());
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_transport_from_options() {
        let options: TransportOptions = serde_json::from_value(json!({
            "type": "sse",
            "streamURL": "http://localhost:8080/stream",
            "sendURL": "http://localhost:8080/send"
        }))
        .unwrap();
        let transport = build_transport(&options, 8).unwrap();
        assert_eq!(transport.kind(), TransportKind::Sse);
        assert_eq!(transport.state(), ConnectionState::Idle);

        let bad = TransportOptions::Websocket {
            url: "not a url".to_string(),
            reconnect_policy: None,
        };
        assert!(matches!(
            build_transport(&bad, 8),
            Err(TransportError::InvalidOptions(_))
        ));
    }
}
