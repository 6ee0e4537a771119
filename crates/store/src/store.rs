use crate::backend::PersistenceBackend;
use crate::types::{HistoryQuery, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamui_core::Envelope;
use tokio::sync::Mutex;

pub type UpdateHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered, append-only envelope history per conversation.
///
/// Appends are serialized: each one is pushed in memory, handed to the
/// backend (if any) and only then announced to `update` subscribers.
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Vec<Envelope>>>,
    backend: Option<Arc<dyn PersistenceBackend>>,
    append_lock: Mutex<()>,
    handlers: RwLock<Vec<(HandlerId, UpdateHandler)>>,
    next_handler: AtomicU64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            backend: None,
            append_lock: Mutex::new(()),
            handlers: RwLock::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        }
    }

    pub fn with_backend(backend: Arc<dyn PersistenceBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ensure(&self, conversation_id: &str) {
        self.conversations
            .write()
            .entry(conversation_id.to_string())
            .or_default();
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.read().contains_key(conversation_id)
    }

    /// Appends `envelope`, giving it a fresh id if it has none, and returns
    /// the stored copy. Backend failures are logged; the in-memory append
    /// stands regardless.
    pub async fn append(&self, conversation_id: &str, mut envelope: Envelope) -> Envelope {
        let _ordered = self.append_lock.lock().await;

        if envelope.id.is_none() {
            envelope.id = Some(uuid::Uuid::new_v4().to_string());
        }
        self.conversations
            .write()
            .entry(conversation_id.to_string())
            .or_default()
            .push(envelope.clone());

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.append(conversation_id, &envelope).await {
                tracing::error!(
                    "Failed to persist envelope for conversation {}: {}",
                    conversation_id,
                    e
                );
            }
        }

        self.notify(conversation_id);
        envelope
    }

    pub fn get_history(&self, conversation_id: &str, query: &HistoryQuery) -> Vec<Envelope> {
        let conversations = self.conversations.read();
        let Some(entries) = conversations.get(conversation_id) else {
            return Vec::new();
        };

        let start = match &query.from_turn_id {
            Some(turn_id) => match entries
                .iter()
                .position(|e| e.id.as_deref() == Some(turn_id.as_str()))
            {
                Some(index) => index + 1,
                None => return Vec::new(),
            },
            None => 0,
        };
        let filtered = &entries[start..];

        let skip = match query.limit {
            Some(limit) => filtered.len().saturating_sub(limit),
            None => 0,
        };
        filtered[skip..].to_vec()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .read()
            .get(conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id) == 0
    }

    pub fn conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hydrates `conversation_id` from the backend. Only an empty in-memory
    /// entry is replaced. Returns the number of envelopes now held.
    pub async fn load(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(self.len(conversation_id));
        };
        let loaded = backend.load(conversation_id).await?;

        let _ordered = self.append_lock.lock().await;
        let mut conversations = self.conversations.write();
        let entry = conversations.entry(conversation_id.to_string()).or_default();
        if entry.is_empty() {
            *entry = loaded;
            tracing::info!(
                "Restored {} envelopes for conversation {}",
                entry.len(),
                conversation_id
            );
        } else {
            tracing::warn!(
                "Conversation {} already has history in memory; not reloading",
                conversation_id
            );
        }
        Ok(entry.len())
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        let _ordered = self.append_lock.lock().await;
        self.conversations.write().remove(conversation_id);
        if let Some(backend) = &self.backend {
            backend.clear(conversation_id).await?;
        }
        Ok(())
    }

    pub fn on_update<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    fn notify(&self, conversation_id: &str) {
        let handlers: Vec<UpdateHandler> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(conversation_id)
            }));
            if delivered.is_err() {
                tracing::error!("Update handler panicked for conversation {}", conversation_id);
            }
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(n: usize) -> Envelope {
        Envelope::message(json!({"component": "text", "text": n.to_string()})).with_id(format!("t{}", n))
    }

    async fn twelve() -> ConversationStore {
        let store = ConversationStore::new();
        for n in 1..=12 {
            store.append("c", turn(n)).await;
        }
        store
    }

    fn ids(envelopes: &[Envelope]) -> Vec<String> {
        envelopes.iter().filter_map(|e| e.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_limit_keeps_newest_in_order() {
        let store = twelve().await;
        let history = store.get_history("c", &HistoryQuery::last(5));
        assert_eq!(ids(&history), vec!["t8", "t9", "t10", "t11", "t12"]);
    }

    #[tokio::test]
    async fn test_from_turn_id_returns_strict_suffix() {
        let store = twelve().await;
        let history = store.get_history("c", &HistoryQuery::after("t7"));
        assert_eq!(ids(&history), vec!["t8", "t9", "t10", "t11", "t12"]);

        let limited = store.get_history("c", &HistoryQuery::after("t7").with_limit(2));
        assert_eq!(ids(&limited), vec!["t11", "t12"]);

        assert!(store.get_history("c", &HistoryQuery::after("t99")).is_empty());
        assert!(store.get_history("c", &HistoryQuery::after("t12")).is_empty());
        assert!(store.get_history("unknown", &HistoryQuery::all()).is_empty());
        assert_eq!(store.get_history("c", &HistoryQuery::last(50)).len(), 12);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_id_and_assigns_missing() {
        let store = ConversationStore::new();
        let kept = store.append("c", turn(1)).await;
        assert_eq!(kept.id.as_deref(), Some("t1"));

        let assigned = store.append("c", Envelope::new("user_message", json!("hi"))).await;
        let id = assigned.id.clone().unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(store.get_history("c", &HistoryQuery::all())[1], assigned);
    }

    #[tokio::test]
    async fn test_handlers_fire_per_append_until_removed() {
        let store = ConversationStore::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = store.on_update(move |conv| sink.lock().push(conv.to_string()));

        store.append("a", turn(1)).await;
        store.append("b", turn(2)).await;
        assert!(store.off(id));
        store.append("a", turn(3)).await;

        assert_eq!(*seen.lock(), vec!["a", "b"]);
        assert!(!store.off(id));
        assert_eq!(store.conversations(), vec!["a", "b"]);
        assert_eq!(store.len("a"), 2);
    }

    #[tokio::test]
    async fn test_ensure_creates_empty_entry() {
        let store = ConversationStore::new();
        store.ensure("fresh");
        assert!(store.contains("fresh"));
        assert!(store.is_empty("fresh"));
        store.clear("fresh").await.unwrap();
        assert!(!store.contains("fresh"));
    }
}
