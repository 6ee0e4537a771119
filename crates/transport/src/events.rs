use crate::error::TransportError;
use crate::state::ConnectionState;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamui_core::{Envelope, MESSAGE_TYPE, PATCH_TYPE, UI_TYPE};

pub const RAW_TYPE: &str = "raw";

const CONTROL_TYPES: [&str; 6] = ["control", "ping", "pong", "ack", "error", "done"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Message,
    Patch,
    Control,
    Event,
}

pub fn classify(envelope: &Envelope) -> EventCategory {
    match envelope.kind.as_str() {
        PATCH_TYPE => EventCategory::Patch,
        MESSAGE_TYPE | UI_TYPE => EventCategory::Message,
        kind if CONTROL_TYPES.contains(&kind) => EventCategory::Control,
        _ => EventCategory::Event,
    }
}

/// Turns one inbound text frame into an envelope. `event_name` is the SSE
/// `event:` field, used as the type when the data does not carry one.
pub fn decode_frame(text: &str, event_name: Option<&str>) -> Envelope {
    let fallback = event_name.unwrap_or(RAW_TYPE);
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Envelope::new(fallback, Value::String(text.to_string())),
    };

    match value {
        Value::Object(mut object) => {
            let id = object.get("id").and_then(Value::as_str).map(str::to_string);
            let kind = match object.remove("type") {
                Some(Value::String(kind)) => kind,
                Some(other) => {
                    object.insert("type".to_string(), other);
                    fallback.to_string()
                }
                None => fallback.to_string(),
            };
            let payload = match object.remove("payload") {
                Some(payload) => payload,
                None => Value::Object(object),
            };
            Envelope { kind, payload, id }
        }
        other => Envelope::new(fallback, other),
    }
}

pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers<H> {
    entries: RwLock<Vec<(SubscriptionId, H)>>,
}

impl<H: Clone> Subscribers<H> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, id: SubscriptionId, handler: H) {
        self.entries.write().push((id, handler));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Handlers are cloned out so a handler may subscribe or unsubscribe
    /// without deadlocking.
    fn snapshot(&self) -> Vec<H> {
        self.entries.read().iter().map(|(_, h)| h.clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Fan-out of inbound frames, state changes and errors. Subscribers run in
/// subscription order; a panicking subscriber is logged and skipped.
pub struct EventBus {
    next_id: AtomicU64,
    message: Subscribers<EnvelopeHandler>,
    patch: Subscribers<EnvelopeHandler>,
    control: Subscribers<EnvelopeHandler>,
    event: Subscribers<EnvelopeHandler>,
    state: Subscribers<StateHandler>,
    error: Subscribers<ErrorHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            message: Subscribers::new(),
            patch: Subscribers::new(),
            control: Subscribers::new(),
            event: Subscribers::new(),
            state: Subscribers::new(),
            error: Subscribers::new(),
        }
    }

    fn next(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn envelopes(&self, category: EventCategory) -> &Subscribers<EnvelopeHandler> {
        match category {
            EventCategory::Message => &self.message,
            EventCategory::Patch => &self.patch,
            EventCategory::Control => &self.control,
            EventCategory::Event => &self.event,
        }
    }

    pub fn subscribe<F>(&self, category: EventCategory, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = self.next();
        self.envelopes(category).push(id, Arc::new(handler));
        id
    }

    pub fn on_message<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Message, handler)
    }

    pub fn on_patch<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Patch, handler)
    }

    pub fn on_control<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Control, handler)
    }

    pub fn on_event<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Event, handler)
    }

    pub fn on_state_change<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next();
        self.state.push(id, Arc::new(handler));
        id
    }

    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        let id = self.next();
        self.error.push(id, Arc::new(handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.message.remove(id)
            || self.patch.remove(id)
            || self.control.remove(id)
            || self.event.remove(id)
            || self.state.remove(id)
            || self.error.remove(id)
    }

    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.envelopes(category).len()
    }

    pub fn dispatch(&self, envelope: &Envelope) -> EventCategory {
        let category = classify(envelope);
        tracing::debug!("Inbound '{}' frame classified as {:?}", envelope.kind, category);
        for handler in self.envelopes(category).snapshot() {
            guarded("envelope", || handler(envelope));
        }
        category
    }

    pub fn dispatch_text(&self, text: &str, event_name: Option<&str>) -> EventCategory {
        self.dispatch(&decode_frame(text, event_name))
    }

    pub fn emit_state(&self, state: ConnectionState) {
        for handler in self.state.snapshot() {
            guarded("state", || handler(state));
        }
    }

    pub fn emit_error(&self, error: &TransportError) {
        for handler in self.error.snapshot() {
            guarded("error", || handler(error));
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn guarded(kind: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("A {} subscriber panicked; continuing delivery", kind);
    }
}
