use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Invalid transport options: {0}")]
    InvalidOptions(String),
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Connection lost: {0}")]
    Stream(String),
    #[error("Transport is not open")]
    NotOpen,
    #[error("Send queue full ({0} pending)")]
    QueueFull(usize),
    #[error("No send endpoint configured")]
    SendUnsupported,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Discarded {0} unsent frames")]
    Discarded(usize),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// True for errors after which the transport will not reconnect on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::ReconnectExhausted { .. } | TransportError::Closed
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}

impl From<streamui_core::CoreError> for TransportError {
    fn from(e: streamui_core::CoreError) -> Self {
        TransportError::InvalidOptions(e.to_string())
    }
}
