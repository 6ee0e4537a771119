use async_trait::async_trait;
use serde_json::Value;
use streamui_core::{Component, ComponentError, ParseOutcome, RenderScope, View, ERROR_TAG};

/// The designated error indicator. Carries the offending raw payload so the
/// failure stays inspectable in place of the node that could not render.
pub struct ErrorLeaf {
    reason: String,
    raw: Value,
}

impl ErrorLeaf {
    pub fn new(reason: impl Into<String>, raw: Value) -> Self {
        Self {
            reason: reason.into(),
            raw,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn view(&self) -> View {
        let mut view = View::new(ERROR_TAG)
            .text(self.reason.clone())
            .attr("payload", self.raw.to_string());
        if let Some(tag) = self.raw.get("component").and_then(Value::as_str) {
            view = view.attr("component", tag);
        }
        view
    }
}

#[async_trait]
impl Component for ErrorLeaf {
    fn tag(&self) -> &str {
        ERROR_TAG
    }

    fn parse(&mut self, raw: &Value) -> ParseOutcome {
        self.raw = raw.clone();
        ParseOutcome::Valid
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn render(&mut self, _scope: &RenderScope) -> Result<View, ComponentError> {
        Ok(self.view())
    }
}
