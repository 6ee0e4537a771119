//! In-memory document: ordered child lists of self-rendering elements.
//!
//! Every element carries stamped metadata (tag, reconciliation key, node id,
//! layout). The interpreter reads identity back from this metadata rather than
//! from the node descriptions that produced it.

use crate::component::{Component, View};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileKey {
    Key(String),
    Id(String),
    Index(usize),
}

impl ReconcileKey {
    pub fn for_node(key: Option<&str>, id: Option<&str>, index: usize) -> Self {
        match (key, id) {
            (Some(key), _) => ReconcileKey::Key(key.to_string()),
            (None, Some(id)) => ReconcileKey::Id(id.to_string()),
            (None, None) => ReconcileKey::Index(index),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            ReconcileKey::Key(value) | ReconcileKey::Id(value) => Some(value),
            ReconcileKey::Index(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementMeta {
    pub tag: String,
    pub key: ReconcileKey,
    pub node_id: Option<String>,
    pub layout: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Live,
    Exiting,
}

pub struct Element {
    handle: u64,
    meta: RwLock<ElementMeta>,
    instance: Mutex<Box<dyn Component>>,
    view: RwLock<View>,
    children: Container,
    phase: RwLock<Phase>,
    enters: AtomicU32,
    updates: AtomicU32,
    exits: AtomicU32,
}

impl Element {
    pub fn new(meta: ElementMeta, instance: Box<dyn Component>) -> Arc<Self> {
        Arc::new(Self {
            handle: next_handle(),
            meta: RwLock::new(meta),
            instance: Mutex::new(instance),
            view: RwLock::new(View::default()),
            children: Container::new(),
            phase: RwLock::new(Phase::Live),
            enters: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            exits: AtomicU32::new(0),
        })
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn meta(&self) -> ElementMeta {
        self.meta.read().clone()
    }

    pub fn set_meta(&self, meta: ElementMeta) {
        *self.meta.write() = meta;
    }

    pub fn tag(&self) -> String {
        self.meta.read().tag.clone()
    }

    pub fn node_id(&self) -> Option<String> {
        self.meta.read().node_id.clone()
    }

    pub fn reconcile_key(&self) -> ReconcileKey {
        self.meta.read().key.clone()
    }

    pub fn view(&self) -> View {
        self.view.read().clone()
    }

    pub fn set_view(&self, view: View) {
        *self.view.write() = view;
    }

    pub fn children(&self) -> &Container {
        &self.children
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }

    pub async fn instance(&self) -> MutexGuard<'_, Box<dyn Component>> {
        self.instance.lock().await
    }

    pub fn record_enter(&self) {
        self.enters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enter_count(&self) -> u32 {
        self.enters.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> u32 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn exit_count(&self) -> u32 {
        self.exits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ElementSnapshot {
        let meta = self.meta();
        ElementSnapshot {
            tag: meta.tag,
            key: meta.key.label().map(str::to_string),
            node_id: meta.node_id,
            layout: meta.layout,
            view: self.view(),
            children: self.children.snapshot(),
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("handle", &self.handle)
            .field("meta", &*self.meta.read())
            .field("phase", &self.phase())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
    pub view: View,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Unchanged,
    Inserted,
    Moved,
}

/// Guard held for the duration of one reconciliation pass over a container.
pub struct PassGuard {
    _guard: OwnedMutexGuard<()>,
}

struct ContainerInner {
    id: u64,
    children: RwLock<Vec<Arc<Element>>>,
    pass: Arc<Mutex<()>>,
    overlay: RwLock<Option<View>>,
}

/// An ordered child list. Cloning yields another handle to the same list.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                id: next_handle(),
                children: RwLock::new(Vec::new()),
                pass: Arc::new(Mutex::new(())),
                overlay: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn same_as(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Waits for any in-flight pass on this container, then holds it
    /// exclusively until the guard is dropped.
    pub async fn begin_pass(&self) -> PassGuard {
        PassGuard {
            _guard: self.inner.pass.clone().lock_owned().await,
        }
    }

    pub fn children(&self) -> Vec<Arc<Element>> {
        self.inner.children.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.children.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.children.read().is_empty()
    }

    pub fn append(&self, element: Arc<Element>) {
        self.inner.children.write().push(element);
    }

    /// Puts `element` immediately after `prev` (or first when `prev` is
    /// `None`), touching the list only if it is not already there.
    pub fn place_after(&self, element: &Arc<Element>, prev: Option<&Arc<Element>>) -> Placement {
        let mut children = self.inner.children.write();
        let current = children.iter().position(|c| c.handle() == element.handle());
        let target = match prev {
            Some(prev) => match children.iter().position(|c| c.handle() == prev.handle()) {
                Some(index) => index + 1,
                None => children.len(),
            },
            None => 0,
        };

        match current {
            Some(index) if index == target => Placement::Unchanged,
            Some(index) => {
                let moved = children.remove(index);
                let target = if index < target { target - 1 } else { target };
                let len = children.len();
                children.insert(target.min(len), moved);
                Placement::Moved
            }
            None => {
                let len = children.len();
                children.insert(target.min(len), element.clone());
                Placement::Inserted
            }
        }
    }

    pub fn detach(&self, element: &Element) -> bool {
        let mut children = self.inner.children.write();
        let before = children.len();
        children.retain(|child| child.handle() != element.handle());
        children.len() != before
    }

    pub fn clear(&self) {
        self.inner.children.write().clear();
    }

    /// Depth-first search of this container's subtree for a live element
    /// stamped with `node_id`. Returns the element and the container that
    /// directly holds it.
    pub fn find(&self, node_id: &str) -> Option<(Container, Arc<Element>)> {
        for child in self.children() {
            if child.phase() == Phase::Exiting {
                continue;
            }
            if child.node_id().as_deref() == Some(node_id) {
                return Some((self.clone(), child));
            }
            if let Some(found) = child.children().find(node_id) {
                return Some(found);
            }
        }
        None
    }

    /// Resolves a sequence of node ids to the child container of the last
    /// one. An empty path is this container.
    pub fn resolve_path(&self, segments: &[&str]) -> Option<Container> {
        let mut current = self.clone();
        for segment in segments {
            let (_, element) = current.find(segment)?;
            current = element.children().clone();
        }
        Some(current)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.find(node_id).is_some()
    }

    pub fn overlay(&self) -> Option<View> {
        self.inner.overlay.read().clone()
    }

    pub fn set_overlay(&self, view: View) {
        *self.inner.overlay.write() = Some(view);
    }

    pub fn clear_overlay(&self) -> bool {
        self.inner.overlay.write().take().is_some()
    }

    pub fn snapshot(&self) -> Vec<ElementSnapshot> {
        self.children().iter().map(|child| child.snapshot()).collect()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("children", &self.len())
            .finish()
    }
}
