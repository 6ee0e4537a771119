use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use streamui_components::{ComponentRegistry, ErrorLeaf, Resolution};
use streamui_core::{
    node_list, ChildRenderer, Component, ComponentFactory, ComponentNode, Container, Element,
    ElementMeta, ParseOutcome, Phase, Placement, ReconcileKey, RenderScope, RenderStats, ERROR_TAG,
};

/// Ceiling on entrance and exit sequences.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_millis(400);

struct Inner {
    registry: Arc<ComponentRegistry>,
    transition_timeout: Duration,
}

/// Cheap to clone; clones share the registry and settings.
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<Inner>,
}

/// Where a node resolved to before any element exists for it.
enum Decoded {
    Ready(ComponentNode, ComponentFactory),
    Failed(String),
}

impl Decoded {
    fn tag(&self) -> &str {
        match self {
            Decoded::Ready(node, _) => &node.component,
            Decoded::Failed(_) => ERROR_TAG,
        }
    }
}

impl Interpreter {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self::with_transition_timeout(registry, DEFAULT_TRANSITION_TIMEOUT)
    }

    pub fn with_transition_timeout(registry: Arc<ComponentRegistry>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                transition_timeout: timeout,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    pub fn transition_timeout(&self) -> Duration {
        self.inner.transition_timeout
    }

    /// Reconciles `container`'s children against `nodes`. Waits for any pass
    /// already running on the same container first.
    pub async fn render(&self, container: &Container, nodes: Vec<Value>) -> RenderStats {
        let _pass = container.begin_pass().await;
        self.reconcile(container, nodes).await
    }

    /// Like `render`, accepting a single node, an array, or null.
    pub async fn render_payload(&self, container: &Container, payload: &Value) -> RenderStats {
        self.render(container, node_list(payload)).await
    }

    async fn reconcile(&self, container: &Container, nodes: Vec<Value>) -> RenderStats {
        let report = self.inner.registry.ensure_defined(&nodes).await;
        for (tag, reason) in &report.failed {
            tracing::debug!("Tag '{}' will render as error leaf: {}", tag, reason);
        }

        let mut stats = RenderStats::default();
        let existing: Vec<Arc<Element>> = container
            .children()
            .into_iter()
            .filter(|el| el.phase() == Phase::Live)
            .collect();

        let mut lookup: HashMap<ReconcileKey, Arc<Element>> = HashMap::new();
        for el in &existing {
            lookup.entry(el.reconcile_key()).or_insert_with(|| el.clone());
        }

        let mut seen = HashSet::new();
        let mut ordered: Vec<Arc<Element>> = Vec::with_capacity(nodes.len());
        let mut created: Vec<Arc<Element>> = Vec::new();

        for (index, raw) in nodes.into_iter().enumerate() {
            let key = reconcile_key(&raw, index);
            let candidate = if seen.insert(key.clone()) {
                lookup.remove(&key)
            } else {
                tracing::warn!("Duplicate reconciliation key {:?}; later node treated as new", key);
                None
            };

            let decoded = self.decode(&raw);
            match candidate {
                Some(el) if el.tag() == decoded.tag() => {
                    if !self.update(&el, decoded, &raw, key).await {
                        stats.failed += 1;
                    }
                    stats.reused += 1;
                    ordered.push(el);
                }
                _ => {
                    let (el, ok) = self.construct(decoded, &raw, key).await;
                    if !ok {
                        stats.failed += 1;
                    }
                    stats.created += 1;
                    created.push(el.clone());
                    ordered.push(el);
                }
            }
        }

        let mut prev: Option<&Arc<Element>> = None;
        for el in &ordered {
            if container.place_after(el, prev) == Placement::Moved {
                stats.moved += 1;
            }
            prev = Some(el);
        }

        let consumed: HashSet<u64> = ordered.iter().map(|el| el.handle()).collect();
        let doomed: Vec<Arc<Element>> = existing
            .into_iter()
            .filter(|el| !consumed.contains(&el.handle()))
            .collect();
        stats.removed = doomed.len();

        join_all(created.iter().map(|el| self.enter(el))).await;
        join_all(doomed.iter().map(|el| self.retire(container, el))).await;

        tracing::debug!(
            "Reconciled container {}: {} created, {} reused, {} moved, {} removed, {} failed",
            container.id(),
            stats.created,
            stats.reused,
            stats.moved,
            stats.removed,
            stats.failed
        );
        stats
    }

    fn decode(&self, raw: &Value) -> Decoded {
        let node = match ComponentNode::from_value(raw) {
            Ok(node) => node,
            Err(e) => return Decoded::Failed(e.to_string()),
        };
        match self.inner.registry.resolve(&node.component) {
            Resolution::Ready(factory) => Decoded::Ready(node, factory),
            Resolution::Unrenderable(reason) => {
                Decoded::Failed(format!("Unknown component: {} ({})", node.component, reason))
            }
            Resolution::Missing => Decoded::Failed(format!("Unknown component: {}", node.component)),
        }
    }

    /// Builds a new element for `raw` and delivers its data. The flag is
    /// false when the element ended up as an error leaf.
    pub(crate) async fn construct_raw(&self, raw: &Value, key: ReconcileKey) -> (Arc<Element>, bool) {
        let decoded = self.decode(raw);
        self.construct(decoded, raw, key).await
    }

    async fn construct(&self, decoded: Decoded, raw: &Value, key: ReconcileKey) -> (Arc<Element>, bool) {
        match decoded {
            Decoded::Ready(node, factory) => {
                let built = std::panic::catch_unwind(AssertUnwindSafe(|| factory()));
                match built {
                    Ok(instance) => {
                        let el = Element::new(meta_for(&node, key), instance);
                        let ok = self.deliver(&el, raw).await;
                        (el, ok)
                    }
                    Err(_) => {
                        let reason = format!("Component '{}' failed to construct", node.component);
                        tracing::error!("{}", reason);
                        (self.error_element(reason, raw, key).await, false)
                    }
                }
            }
            Decoded::Failed(reason) => {
                tracing::warn!("{}", reason);
                (self.error_element(reason, raw, key).await, false)
            }
        }
    }

    async fn error_element(&self, reason: String, raw: &Value, key: ReconcileKey) -> Arc<Element> {
        let leaf = ErrorLeaf::new(reason, raw.clone());
        let el = Element::new(error_meta(raw, key), Box::new(leaf));
        self.deliver(&el, raw).await;
        el
    }

    /// Replaces the data of an existing element in place. Returns false when
    /// the element degraded to an error leaf.
    async fn update(&self, el: &Arc<Element>, decoded: Decoded, raw: &Value, key: ReconcileKey) -> bool {
        el.record_update();
        match decoded {
            Decoded::Ready(node, _) => {
                el.set_meta(meta_for(&node, key));
                self.deliver(el, raw).await
            }
            Decoded::Failed(reason) => {
                {
                    let mut instance = el.instance().await;
                    *instance = Box::new(ErrorLeaf::new(reason, raw.clone()));
                }
                el.set_meta(error_meta(raw, key));
                self.deliver(el, raw).await;
                false
            }
        }
    }

    /// In-place update entry point for patches.
    pub(crate) async fn update_raw(&self, el: &Arc<Element>, raw: &Value) -> bool {
        let decoded = self.decode(raw);
        self.update(el, decoded, raw, el.reconcile_key()).await
    }

    pub(crate) fn resolved_tag(&self, raw: &Value) -> String {
        self.decode(raw).tag().to_string()
    }

    /// Parses and renders `raw` into `el`. Invalid data, an unready leaf,
    /// render errors and panics swap the element's instance for an error leaf.
    async fn deliver(&self, el: &Arc<Element>, raw: &Value) -> bool {
        let mut instance = el.instance().await;
        let tag = instance.tag().to_string();

        let parsed = std::panic::catch_unwind(AssertUnwindSafe(|| instance.parse(raw)));
        let rejected = match parsed {
            Ok(ParseOutcome::Valid) => None,
            Ok(ParseOutcome::Recovered(warnings)) => {
                tracing::warn!("Component '{}' recovered from payload: {}", tag, warnings.join("; "));
                None
            }
            Ok(ParseOutcome::Invalid(reason)) => Some(format!("Invalid {} payload: {}", tag, reason)),
            Err(_) => Some(format!("Component '{}' panicked while parsing", tag)),
        };
        let rejected = rejected.or_else(|| {
            (!instance.is_ready()).then(|| format!("Component '{}' is not ready after parse", tag))
        });
        if let Some(reason) = rejected {
            tracing::warn!("{}", reason);
            drop(instance);
            self.degrade(el, reason, raw).await;
            return false;
        }

        let scope = RenderScope::new(el.children().clone(), Arc::new(self.clone()));
        let result = AssertUnwindSafe(instance.render(&scope)).catch_unwind().await;
        drop(instance);

        let reason = match result {
            Ok(Ok(view)) => {
                el.set_view(view);
                return tag != ERROR_TAG;
            }
            Ok(Err(e)) => format!("Component '{}' failed to render: {}", tag, e),
            Err(_) => format!("Component '{}' panicked while rendering", tag),
        };
        tracing::error!("{}", reason);
        self.degrade(el, reason, raw).await;
        false
    }

    async fn degrade(&self, el: &Arc<Element>, reason: String, raw: &Value) {
        let leaf = ErrorLeaf::new(reason, raw.clone());
        el.set_view(leaf.view());
        el.children().clear();
        let mut meta = el.meta();
        meta.tag = ERROR_TAG.to_string();
        el.set_meta(meta);
        *el.instance().await = Box::new(leaf);
    }

    pub(crate) async fn enter(&self, el: &Arc<Element>) {
        let mut instance = el.instance().await;
        let tag = instance.tag().to_string();
        let entrance = AssertUnwindSafe(instance.enter()).catch_unwind();
        match tokio::time::timeout(self.inner.transition_timeout, entrance).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::error!("Entrance of '{}' panicked", tag),
            Err(_) => tracing::debug!("Entrance of '{}' hit the transition ceiling", tag),
        }
        el.record_enter();
    }

    /// Runs the exit sequence (bounded) and then detaches `el`.
    pub(crate) async fn retire(&self, container: &Container, el: &Arc<Element>) {
        el.set_phase(Phase::Exiting);
        {
            let mut instance = el.instance().await;
            let tag = instance.tag().to_string();
            let exit = AssertUnwindSafe(instance.exit()).catch_unwind();
            match tokio::time::timeout(self.inner.transition_timeout, exit).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!("Exit of '{}' panicked", tag),
                Err(_) => tracing::debug!("Exit of '{}' hit the transition ceiling", tag),
            }
        }
        el.record_exit();
        container.detach(el);
    }
}

#[async_trait]
impl ChildRenderer for Interpreter {
    async fn render_into(&self, container: &Container, nodes: Vec<Value>) -> RenderStats {
        self.render(container, nodes).await
    }
}

pub(crate) fn reconcile_key(raw: &Value, index: usize) -> ReconcileKey {
    ReconcileKey::for_node(
        raw.get("key").and_then(Value::as_str),
        raw.get("id").and_then(Value::as_str),
        index,
    )
}

fn meta_for(node: &ComponentNode, key: ReconcileKey) -> ElementMeta {
    ElementMeta {
        tag: node.component.clone(),
        key,
        node_id: node.id.clone(),
        layout: node.layout.clone(),
    }
}

fn error_meta(raw: &Value, key: ReconcileKey) -> ElementMeta {
    ElementMeta {
        tag: ERROR_TAG.to_string(),
        key,
        node_id: raw.get("id").and_then(Value::as_str).map(str::to_string),
        layout: raw.get("layout").cloned(),
    }
}
