use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use streamui_core::Envelope;
use streamui_store::{
    ConversationStore, HistoryQuery, JsonlBackend, MemoryBackend, PersistenceBackend, StoreError,
};

struct FailingBackend;

#[async_trait]
impl PersistenceBackend for FailingBackend {
    async fn append(&self, _: &str, _: &Envelope) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    async fn load(&self, _: &str) -> Result<Vec<Envelope>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self, _: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

/// Records when each append becomes durable; the first append is slow.
struct SlowBackend {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PersistenceBackend for SlowBackend {
    async fn append(&self, _: &str, envelope: &Envelope) -> Result<(), StoreError> {
        let id = envelope.id.clone().unwrap_or_default();
        if id == "first" {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.log.lock().push(format!("persisted:{}", id));
        Ok(())
    }

    async fn load(&self, _: &str) -> Result<Vec<Envelope>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self, _: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_backend_failure_keeps_memory_append() {
    let store = ConversationStore::with_backend(Arc::new(FailingBackend));
    let notified = Arc::new(Mutex::new(0));
    let counter = notified.clone();
    store.on_update(move |_| *counter.lock() += 1);

    let stored = store
        .append("c", Envelope::message(json!({"component": "text", "text": "x"})))
        .await;

    assert_eq!(store.len("c"), 1);
    assert_eq!(store.get_history("c", &HistoryQuery::all()), vec![stored]);
    assert_eq!(*notified.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_follow_persistence_in_append_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(ConversationStore::with_backend(Arc::new(SlowBackend {
        log: log.clone(),
    })));
    let sink = log.clone();
    let reader = store.clone();
    store.on_update(move |conv| {
        let newest = reader.get_history(conv, &HistoryQuery::last(1));
        let id = newest[0].id.clone().unwrap_or_default();
        sink.lock().push(format!("notified:{}", id));
    });

    tokio::join!(
        store.append("c", Envelope::message(json!(1)).with_id("first")),
        store.append("c", Envelope::message(json!(2)).with_id("second")),
    );

    assert_eq!(
        *log.lock(),
        vec![
            "persisted:first",
            "notified:first",
            "persisted:second",
            "notified:second"
        ]
    );
}

#[tokio::test]
async fn test_jsonl_history_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let first_run = ConversationStore::with_backend(Arc::new(JsonlBackend::new(temp_dir.path())));
    for n in 0..4 {
        first_run
            .append("conv", Envelope::message(json!(n)).with_id(format!("m{}", n)))
            .await;
    }
    drop(first_run);

    let second_run = ConversationStore::with_backend(Arc::new(JsonlBackend::new(temp_dir.path())));
    assert_eq!(second_run.len("conv"), 0);
    assert_eq!(second_run.load("conv").await.unwrap(), 4);

    let tail = second_run.get_history("conv", &HistoryQuery::after("m1"));
    let ids: Vec<_> = tail.iter().filter_map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["m2", "m3"]);

    second_run.clear("conv").await.unwrap();
    assert!(!temp_dir.path().join("conv.jsonl").exists());
}

#[tokio::test]
async fn test_load_does_not_clobber_live_history() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .append("c", &Envelope::message(json!("old")).with_id("old"))
        .await
        .unwrap();
    let store = ConversationStore::with_backend(backend.clone());
    store.append("c", Envelope::message(json!("new")).with_id("new")).await;

    assert_eq!(store.load("c").await.unwrap(), 1);
    assert_eq!(store.get_history("c", &HistoryQuery::all())[0].id.as_deref(), Some("new"));
    assert_eq!(backend.load("c").await.unwrap().len(), 2);
}
