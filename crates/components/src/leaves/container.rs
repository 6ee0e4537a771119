use async_trait::async_trait;
use serde_json::Value;
use streamui_core::{
    child_values, Component, ComponentError, ComponentKind, ParseOutcome, RenderScope, View,
};

/// Container-typed leaves. Rendering delegates the nested node list back to
/// the interpreter through the render scope.
pub struct ContainerLeaf {
    kind: ComponentKind,
    children: Vec<Value>,
    title: Option<String>,
    href: Option<String>,
    ready: bool,
}

impl ContainerLeaf {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            title: None,
            href: None,
            ready: false,
        }
    }
}

#[async_trait]
impl Component for ContainerLeaf {
    fn tag(&self) -> &str {
        self.kind.tag()
    }

    fn parse(&mut self, raw: &Value) -> ParseOutcome {
        let Some(object) = raw.as_object() else {
            self.ready = false;
            return ParseOutcome::Invalid("expected an object".to_string());
        };

        let mut warnings = Vec::new();
        if matches!(object.get("children"), Some(v) if !v.is_array() && !v.is_null()) {
            warnings.push("`children` is not an array; treated as empty".to_string());
        }

        self.children = child_values(object).into_iter().cloned().collect();
        self.title = object
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.href = object
            .get("href")
            .and_then(Value::as_str)
            .map(str::to_string);

        if self.kind == ComponentKind::Link && self.href.is_none() {
            warnings.push("link without `href`".to_string());
        }

        self.ready = true;
        if warnings.is_empty() {
            ParseOutcome::Valid
        } else {
            ParseOutcome::Recovered(warnings)
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn render(&mut self, scope: &RenderScope) -> Result<View, ComponentError> {
        if !self.ready {
            return Err(ComponentError::NotReady(self.kind.tag().to_string()));
        }

        let stats = scope.render_children(self.children.clone()).await;
        tracing::debug!(
            "{} rendered {} children ({} created, {} reused)",
            self.kind.tag(),
            scope.children().len(),
            stats.created,
            stats.reused
        );

        let mut view = View::new(self.kind.tag()).attr("children", scope.children().len().to_string());
        if let Some(title) = &self.title {
            view = view.text(title.clone());
        }
        if let Some(href) = &self.href {
            view = view.attr("href", href.clone());
        }
        Ok(view)
    }
}
