use async_trait::async_trait;
use serde_json::Value;
use streamui_core::{Component, ComponentError, ComponentKind, ParseOutcome, RenderScope, View};

/// Text-bearing leaves: `text`, `badge` and `button`.
pub struct LabelLeaf {
    kind: ComponentKind,
    text: Option<String>,
    variant: Option<String>,
}

impl LabelLeaf {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            text: None,
            variant: None,
        }
    }
}

#[async_trait]
impl Component for LabelLeaf {
    fn tag(&self) -> &str {
        self.kind.tag()
    }

    fn parse(&mut self, raw: &Value) -> ParseOutcome {
        self.variant = raw
            .get("variant")
            .and_then(Value::as_str)
            .map(str::to_string);

        match raw.get("text").or_else(|| raw.get("label")) {
            Some(Value::String(text)) => {
                self.text = Some(text.clone());
                ParseOutcome::Valid
            }
            Some(Value::Number(n)) => {
                self.text = Some(n.to_string());
                ParseOutcome::Recovered(vec![format!("numeric text {} rendered as string", n)])
            }
            Some(Value::Bool(b)) => {
                self.text = Some(b.to_string());
                ParseOutcome::Recovered(vec![format!("boolean text {} rendered as string", b)])
            }
            Some(other) => {
                self.text = None;
                ParseOutcome::Invalid(format!("`text` must be a string, got {}", other))
            }
            None => {
                self.text = None;
                ParseOutcome::Invalid("missing `text`".to_string())
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.text.is_some()
    }

    async fn render(&mut self, _scope: &RenderScope) -> Result<View, ComponentError> {
        let text = self
            .text
            .clone()
            .ok_or_else(|| ComponentError::NotReady(self.kind.tag().to_string()))?;
        let mut view = View::new(self.kind.tag()).text(text);
        if let Some(variant) = &self.variant {
            view = view.attr("variant", variant.clone());
        }
        Ok(view)
    }
}
