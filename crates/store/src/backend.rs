use crate::types::{validate_conversation_id, StoreError, StoredEnvelope};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use streamui_core::Envelope;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Durable storage behind a `ConversationStore`.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn append(&self, conversation_id: &str, envelope: &Envelope) -> Result<(), StoreError>;

    async fn load(&self, conversation_id: &str) -> Result<Vec<Envelope>, StoreError>;

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-local backend, mostly useful in tests.
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, Vec<Envelope>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn append(&self, conversation_id: &str, envelope: &Envelope) -> Result<(), StoreError> {
        self.records
            .write()
            .entry(conversation_id.to_string())
            .or_default()
            .push(envelope.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Envelope>, StoreError> {
        Ok(self
            .records
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.records.write().remove(conversation_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSON Lines file per conversation under `base_path`. Every append is
/// synced before it returns; unreadable lines are skipped on load.
pub struct JsonlBackend {
    base_path: PathBuf,
}

impl JsonlBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_path).await?;
        tracing::info!("History store initialized at {:?}", self.base_path);
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn conversation_path(&self, conversation_id: &str) -> Result<PathBuf, StoreError> {
        validate_conversation_id(conversation_id)?;
        Ok(self.base_path.join(format!("{}.jsonl", conversation_id)))
    }
}

#[async_trait]
impl PersistenceBackend for JsonlBackend {
    async fn append(&self, conversation_id: &str, envelope: &Envelope) -> Result<(), StoreError> {
        let path = self.conversation_path(conversation_id)?;
        fs::create_dir_all(&self.base_path).await?;

        let mut line = serde_json::to_string(&StoredEnvelope::now(envelope.clone()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Envelope>, StoreError> {
        let path = self.conversation_path(conversation_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let mut envelopes = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredEnvelope>(line) {
                Ok(stored) => envelopes.push(stored.envelope),
                Err(e) => tracing::warn!(
                    "Skipping corrupted line {} in {:?}: {}",
                    number + 1,
                    path,
                    e
                ),
            }
        }

        tracing::debug!("Loaded {} envelopes for {}", envelopes.len(), conversation_id);
        Ok(envelopes)
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        let path = self.conversation_path(conversation_id)?;
        if path.exists() {
            fs::remove_file(&path).await?;
            tracing::info!("Deleted history for conversation: {}", conversation_id);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".jsonl") {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
