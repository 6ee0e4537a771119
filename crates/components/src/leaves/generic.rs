use async_trait::async_trait;
use serde_json::Value;
use streamui_core::{Component, ComponentError, ComponentKind, ParseOutcome, RenderScope, View};

/// Leaf kinds whose visuals live outside the core (images, charts, progress
/// bars, ...). Scalar properties are surfaced as view attributes.
pub struct GenericLeaf {
    kind: ComponentKind,
    props: Vec<(String, String)>,
    ready: bool,
}

impl GenericLeaf {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            props: Vec::new(),
            ready: false,
        }
    }
}

#[async_trait]
impl Component for GenericLeaf {
    fn tag(&self) -> &str {
        self.kind.tag()
    }

    fn parse(&mut self, raw: &Value) -> ParseOutcome {
        let Some(object) = raw.as_object() else {
            self.ready = false;
            return ParseOutcome::Invalid("expected an object".to_string());
        };

        self.props = object
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), "component" | "id" | "key"))
            .filter_map(|(name, value)| match value {
                Value::String(s) => Some((name.clone(), s.clone())),
                Value::Number(n) => Some((name.clone(), n.to_string())),
                Value::Bool(b) => Some((name.clone(), b.to_string())),
                _ => None,
            })
            .collect();
        self.ready = true;
        ParseOutcome::Valid
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn render(&mut self, _scope: &RenderScope) -> Result<View, ComponentError> {
        if !self.ready {
            return Err(ComponentError::NotReady(self.kind.tag().to_string()));
        }
        let mut view = View::new(self.kind.tag());
        for (name, value) in &self.props {
            view = view.attr(name.clone(), value.clone());
        }
        Ok(view)
    }
}
