use crate::config::{ClientConfig, ConfigError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use streamui_components::ComponentRegistry;
use streamui_core::{Container, Envelope, EnvelopeRoute, View, ERROR_TAG, USER_MESSAGE_TYPE};
use streamui_interpreter::{EnvelopeOutcome, Interpreter};
use streamui_store::{ConversationStore, HistoryQuery, JsonlBackend, StoreError};
use streamui_transport::events::EnvelopeHandler;
use streamui_transport::{
    build_transport, classify, EventCategory, SubscriptionId, Transport, TransportError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid conversation id: {0:?}")]
    InvalidConversation(String),
}

/// What a `replay` re-applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub rendered: usize,
    pub patched: usize,
    pub skipped: usize,
}

/// Inbound path shared by the transport pump and direct callers.
#[derive(Clone)]
struct Pipeline {
    interpreter: Interpreter,
    store: Arc<ConversationStore>,
    root: Container,
    event_handlers: Arc<RwLock<Vec<EnvelopeHandler>>>,
}

impl Pipeline {
    async fn ingest(&self, conversation_id: &str, envelope: Envelope) -> EnvelopeOutcome {
        if classify(&envelope) == EventCategory::Event {
            self.forward_event(&envelope);
            return EnvelopeOutcome::Unhandled;
        }

        let stored = self.store.append(conversation_id, envelope).await;
        let outcome = self.interpreter.handle_envelope(&self.root, &stored).await;
        if let EnvelopeOutcome::Patched(patch) = &outcome {
            if !patch.applied() {
                tracing::debug!("Patch in {} not applied: {:?}", conversation_id, patch);
            }
        }
        outcome
    }

    fn forward_event(&self, envelope: &Envelope) {
        let handlers: Vec<EnvelopeHandler> = self.event_handlers.read().clone();
        for handler in handlers {
            let delivered =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(envelope)));
            if delivered.is_err() {
                tracing::error!("Event handler panicked on '{}' envelope", envelope.kind);
            }
        }
    }
}

/// Transport subscriptions and the task feeding their envelopes to the
/// pipeline for one conversation.
struct Binding {
    conversation_id: String,
    subscriptions: Vec<SubscriptionId>,
    pump: JoinHandle<()>,
}

/// Ties a transport, a conversation store and an interpreter to one root
/// container.
pub struct ConversationManager {
    pipeline: Pipeline,
    transport: Option<Arc<dyn Transport>>,
    binding: Mutex<Option<Binding>>,
}

impl ConversationManager {
    /// When `clear_on_init` is set the root container is emptied once here;
    /// afterwards it only changes through the interpreter.
    pub fn new(
        interpreter: Interpreter,
        store: Arc<ConversationStore>,
        transport: Option<Arc<dyn Transport>>,
        root: Container,
        clear_on_init: bool,
    ) -> Self {
        if clear_on_init {
            root.clear();
            root.clear_overlay();
        }
        Self {
            pipeline: Pipeline {
                interpreter,
                store,
                root,
                event_handlers: Arc::new(RwLock::new(Vec::new())),
            },
            transport,
            binding: Mutex::new(None),
        }
    }

    pub async fn from_config(config: &ClientConfig, root: Container) -> Result<Self, ManagerError> {
        config.validate()?;

        let registry = Arc::new(ComponentRegistry::with_builtins(config.stream_leniency));
        let interpreter = Interpreter::with_transition_timeout(registry, config.exit_timeout());

        let store = match &config.history_dir {
            Some(dir) => {
                let backend = JsonlBackend::new(dir);
                backend.initialize().await?;
                ConversationStore::with_backend(Arc::new(backend))
            }
            None => ConversationStore::new(),
        };

        let transport = match &config.transport {
            Some(options) => Some(build_transport(options, config.send_queue_limit)?),
            None => None,
        };

        Ok(Self::new(
            interpreter,
            Arc::new(store),
            transport,
            root,
            config.clear_on_init,
        ))
    }

    pub fn root(&self) -> &Container {
        &self.pipeline.root
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.pipeline.interpreter
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        self.pipeline.interpreter.registry()
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.pipeline.store
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| binding.conversation_id.clone())
    }

    /// Starts or continues a conversation and returns its id. Persisted
    /// history is restored first. With a transport, inbound message, patch
    /// and control envelopes are appended to the store and rendered into the
    /// root container from now on; generic events go to `on_event` handlers.
    pub async fn start_conversation(&self, id: Option<String>) -> Result<String, ManagerError> {
        let conversation_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if conversation_id.trim().is_empty() {
            return Err(ManagerError::InvalidConversation(conversation_id));
        }
        self.pipeline.store.ensure(&conversation_id);
        if self.pipeline.store.is_empty(&conversation_id) {
            self.pipeline.store.load(&conversation_id).await?;
        }

        let Some(transport) = &self.transport else {
            tracing::info!("Started conversation {} without transport", conversation_id);
            return Ok(conversation_id);
        };

        self.disarm();
        let binding = self.arm(transport, &conversation_id);
        *self.binding.lock() = Some(binding);
        tracing::info!(
            "Started conversation {} over {}",
            conversation_id,
            transport.kind()
        );

        if transport.state().can_open() {
            if let Err(e) = transport.open().await {
                tracing::warn!("Transport did not open for {}: {}", conversation_id, e);
            }
        }
        Ok(conversation_id)
    }

    fn arm(&self, transport: &Arc<dyn Transport>, conversation_id: &str) -> Binding {
        let bus = transport.events();
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let mut subscriptions = Vec::new();
        for category in [
            EventCategory::Message,
            EventCategory::Patch,
            EventCategory::Control,
        ] {
            let tx = tx.clone();
            subscriptions.push(bus.subscribe(category, move |envelope| {
                let _ = tx.send(envelope.clone());
            }));
        }

        let pipeline = self.pipeline.clone();
        subscriptions.push(bus.on_event(move |envelope| pipeline.forward_event(envelope)));

        let root = self.pipeline.root.clone();
        subscriptions.push(bus.on_error(move |error| {
            if error.is_terminal() {
                tracing::error!("Conversation channel lost: {}", error);
                root.set_overlay(
                    View::new(ERROR_TAG)
                        .text(format!("Connection lost: {}", error))
                        .attr("scope", "conversation"),
                );
            }
        }));

        let pipeline = self.pipeline.clone();
        let id = conversation_id.to_string();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                pipeline.ingest(&id, envelope).await;
            }
        });

        Binding {
            conversation_id: conversation_id.to_string(),
            subscriptions,
            pump,
        }
    }

    fn disarm(&self) {
        let Some(binding) = self.binding.lock().take() else {
            return;
        };
        if let Some(transport) = &self.transport {
            for id in &binding.subscriptions {
                transport.events().unsubscribe(*id);
            }
        }
        binding.pump.abort();
        tracing::debug!("Detached conversation {}", binding.conversation_id);
    }

    /// Stores a locally authored message and forwards it over the transport.
    /// The stored copy is kept even if sending fails.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        message: Value,
    ) -> Result<Envelope, ManagerError> {
        self.pipeline.root.clear_overlay();
        let stored = self
            .pipeline
            .store
            .append(conversation_id, Envelope::new(USER_MESSAGE_TYPE, message))
            .await;

        if let Some(transport) = &self.transport {
            transport.send(&stored).await?;
        }
        Ok(stored)
    }

    pub fn get_messages(&self, conversation_id: &str, query: &HistoryQuery) -> Vec<Envelope> {
        self.pipeline.store.get_history(conversation_id, query)
    }

    /// Runs one inbound envelope through the same path transport frames take.
    pub async fn handle_inbound(&self, conversation_id: &str, envelope: Envelope) -> EnvelopeOutcome {
        self.pipeline.ingest(conversation_id, envelope).await
    }

    /// Re-applies stored render and patch envelopes, oldest first, to the
    /// root container.
    pub async fn replay(&self, conversation_id: &str) -> ReplayReport {
        let mut report = ReplayReport::default();
        for envelope in self.get_messages(conversation_id, &HistoryQuery::all()) {
            match envelope.route() {
                EnvelopeRoute::Render => report.rendered += 1,
                EnvelopeRoute::Patch => report.patched += 1,
                EnvelopeRoute::Event => {
                    report.skipped += 1;
                    continue;
                }
            }
            self.pipeline
                .interpreter
                .handle_envelope(&self.pipeline.root, &envelope)
                .await;
        }
        tracing::info!(
            "Replayed conversation {}: {} renders, {} patches",
            conversation_id,
            report.rendered,
            report.patched
        );
        report
    }

    /// Subscribes to inbound envelopes that are neither UI nor control traffic.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.pipeline.event_handlers.write().push(Arc::new(handler));
    }

    /// Detaches from the transport and closes it.
    pub async fn shutdown(&self) {
        self.disarm();
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        tracing::info!("Conversation manager shut down");
    }
}

impl Drop for ConversationManager {
    fn drop(&mut self) {
        self.disarm();
    }
}
