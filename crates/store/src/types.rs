use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamui_core::Envelope;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid conversation id: {0:?}")]
    InvalidConversation(String),
}

/// Filter for `get_history`. `from_turn_id` is applied first, then `limit`
/// keeps the newest entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_turn_id: Option<String>,
}

impl HistoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            from_turn_id: None,
        }
    }

    pub fn after(turn_id: impl Into<String>) -> Self {
        Self {
            limit: None,
            from_turn_id: Some(turn_id.into()),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One persisted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub stored_at: DateTime<Utc>,
    pub envelope: Envelope,
}

impl StoredEnvelope {
    pub fn now(envelope: Envelope) -> Self {
        Self {
            stored_at: Utc::now(),
            envelope,
        }
    }
}

/// Rejects ids that could escape a storage directory.
pub fn validate_conversation_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(StoreError::InvalidConversation(id.to_string()));
    }
    Ok(())
}
