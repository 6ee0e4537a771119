use crate::document::Container;
use crate::stats::RenderStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub const ERROR_TAG: &str = "error";

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Component not ready: {0}")]
    NotReady(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Valid,
    /// Usable after substituting defaults; the warnings say what was filled in.
    Recovered(Vec<String>),
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl View {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.tag == ERROR_TAG
    }
}

/// Renders node lists into containers on behalf of container-typed leaves.
#[async_trait]
pub trait ChildRenderer: Send + Sync {
    async fn render_into(&self, container: &Container, nodes: Vec<Value>) -> RenderStats;
}

/// Handed to a component while it renders: its own child slot and a way to
/// reconcile nested nodes into it.
#[derive(Clone)]
pub struct RenderScope {
    children: Container,
    renderer: Arc<dyn ChildRenderer>,
}

impl RenderScope {
    pub fn new(children: Container, renderer: Arc<dyn ChildRenderer>) -> Self {
        Self { children, renderer }
    }

    pub fn children(&self) -> &Container {
        &self.children
    }

    pub async fn render_children(&self, nodes: Vec<Value>) -> RenderStats {
        self.renderer.render_into(&self.children, nodes).await
    }
}

/// Capability surface every renderable node implementation provides.
#[async_trait]
pub trait Component: Send + Sync {
    fn tag(&self) -> &str;

    /// Accepts the raw node description. Called on construction and on every
    /// in-place update.
    fn parse(&mut self, raw: &Value) -> ParseOutcome;

    fn is_ready(&self) -> bool;

    async fn render(&mut self, scope: &RenderScope) -> Result<View, ComponentError>;

    async fn enter(&mut self) {}

    /// Exit sequence. The interpreter bounds the wait with its own timeout.
    async fn exit(&mut self) {}
}

pub type ComponentFactory = Arc<dyn Fn() -> Box<dyn Component> + Send + Sync>;

pub fn factory<F, C>(build: F) -> ComponentFactory
where
    F: Fn() -> C + Send + Sync + 'static,
    C: Component + 'static,
{
    Arc::new(move || Box::new(build()) as Box<dyn Component>)
}
