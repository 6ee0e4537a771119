use crate::leaves::{ContainerLeaf, GenericLeaf, LabelLeaf, Leniency, StreamLeaf};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use streamui_core::{child_values, factory, ComponentFactory, ComponentKind};
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("No implementation registered for component: {0}")]
    Unknown(String),
    #[error("Failed to load component {tag}: {reason}")]
    LoadFailed { tag: String, reason: String },
}

/// Supplies implementations for tags that were not registered up front.
#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load(&self, tag: &str) -> Result<ComponentFactory, RegistryError>;
}

#[derive(Clone)]
enum Slot {
    Ready(ComponentFactory),
    Unrenderable(String),
}

/// What the registry knows about a tag right now.
#[derive(Clone)]
pub enum Resolution {
    Ready(ComponentFactory),
    Unrenderable(String),
    Missing,
}

/// Per-tag outcome of an `ensure_defined` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsureReport {
    pub defined: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl EnsureReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ComponentRegistry {
    slots: RwLock<HashMap<String, Slot>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    loader: RwLock<Option<Arc<dyn ComponentLoader>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            loader: RwLock::new(None),
        }
    }

    /// Registry pre-populated with an implementation for every built-in kind.
    pub fn with_builtins(leniency: Leniency) -> Self {
        let registry = Self::new();
        registry.register_builtins(leniency);
        registry
    }

    pub fn with_loader(self, loader: Arc<dyn ComponentLoader>) -> Self {
        self.set_loader(loader);
        self
    }

    pub fn set_loader(&self, loader: Arc<dyn ComponentLoader>) {
        *self.loader.write() = Some(loader);
    }

    pub fn register_builtins(&self, leniency: Leniency) {
        for kind in ComponentKind::ALL {
            let built = match kind {
                ComponentKind::Text | ComponentKind::Badge | ComponentKind::Button => {
                    factory(move || LabelLeaf::new(kind))
                }
                ComponentKind::Stream => factory(move || StreamLeaf::new(leniency)),
                kind if kind.is_container() => factory(move || ContainerLeaf::new(kind)),
                kind => factory(move || GenericLeaf::new(kind)),
            };
            self.register(kind.tag(), built);
        }
    }

    /// Registers `tag`, replacing any previous implementation or failure
    /// mark. Returns `true` if an implementation was overwritten.
    pub fn register(&self, tag: &str, factory: ComponentFactory) -> bool {
        let previous = self
            .slots
            .write()
            .insert(tag.to_string(), Slot::Ready(factory));
        self.inflight.lock().remove(tag);

        let overwrote = matches!(previous, Some(Slot::Ready(_)));
        if overwrote {
            tracing::warn!("Component '{}' re-registered; last registration wins", tag);
        }
        overwrote
    }

    pub fn get(&self, tag: &str) -> Option<ComponentFactory> {
        match self.slots.read().get(tag) {
            Some(Slot::Ready(factory)) => Some(factory.clone()),
            _ => None,
        }
    }

    pub fn resolve(&self, tag: &str) -> Resolution {
        match self.slots.read().get(tag) {
            Some(Slot::Ready(factory)) => Resolution::Ready(factory.clone()),
            Some(Slot::Unrenderable(reason)) => Resolution::Unrenderable(reason.clone()),
            None => Resolution::Missing,
        }
    }

    pub fn is_unrenderable(&self, tag: &str) -> bool {
        matches!(self.slots.read().get(tag), Some(Slot::Unrenderable(_)))
    }

    pub fn list(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    pub fn count(&self) -> usize {
        self.list().len()
    }

    /// Makes sure every tag referenced by `nodes` (nested children included)
    /// has an implementation or is marked unrenderable. Loads for the same
    /// tag are single-flight across concurrent callers.
    pub async fn ensure_defined(&self, nodes: &[Value]) -> EnsureReport {
        let tags = collect_tags(nodes);
        let pending: Vec<&String> = {
            let slots = self.slots.read();
            tags.iter().filter(|tag| !slots.contains_key(*tag)).collect()
        };

        join_all(pending.into_iter().map(|tag| self.define(tag))).await;

        let mut report = EnsureReport::default();
        for tag in tags {
            match self.resolve(&tag) {
                Resolution::Ready(_) => report.defined.push(tag),
                Resolution::Unrenderable(reason) => report.failed.push((tag, reason)),
                Resolution::Missing => {
                    report
                        .failed
                        .push((tag.clone(), RegistryError::Unknown(tag).to_string()));
                }
            }
        }
        report
    }

    async fn define(&self, tag: &str) {
        let cell = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(tag.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| self.load(tag)).await;
    }

    async fn load(&self, tag: &str) {
        if self.slots.read().contains_key(tag) {
            return;
        }

        let loader = self.loader.read().clone();
        let slot = match loader {
            Some(loader) => match loader.load(tag).await {
                Ok(factory) => {
                    tracing::info!("Loaded component '{}'", tag);
                    Slot::Ready(factory)
                }
                Err(e) => {
                    tracing::error!("Component '{}' marked unrenderable: {}", tag, e);
                    Slot::Unrenderable(e.to_string())
                }
            },
            None => {
                let e = RegistryError::Unknown(tag.to_string());
                tracing::warn!("{}", e);
                Slot::Unrenderable(e.to_string())
            }
        };

        // A register() that raced with the load wins.
        self.slots.write().entry(tag.to_string()).or_insert(slot);
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct component tags in a node list, walking container-typed children.
pub fn collect_tags(nodes: &[Value]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for node in nodes {
        walk(node, &mut tags);
    }
    tags
}

fn walk(value: &Value, tags: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| walk(item, tags)),
        Value::Object(object) => {
            if let Some(Value::String(tag)) = object.get("component") {
                tags.insert(tag.clone());
            }
            for child in child_values(object) {
                walk(child, tags);
            }
        }
        _ => {}
    }
}
