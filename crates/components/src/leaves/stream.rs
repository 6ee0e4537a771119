use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use streamui_core::{Component, ComponentError, ParseOutcome, RenderScope, View};

/// How the streaming list treats payloads without an `items` array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leniency {
    /// Missing or mistyped `items` is invalid.
    Strict,
    /// Missing or mistyped `items` is coerced into a list and reported as
    /// recovered.
    #[default]
    Coerce,
}

pub struct StreamLeaf {
    leniency: Leniency,
    items: Vec<Value>,
    ready: bool,
}

impl StreamLeaf {
    pub fn new(leniency: Leniency) -> Self {
        Self {
            leniency,
            items: Vec::new(),
            ready: false,
        }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    fn coerce(object: &Map<String, Value>) -> Vec<Value> {
        let rest: Map<String, Value> = object
            .iter()
            .filter(|(name, _)| {
                !matches!(
                    name.as_str(),
                    "component" | "id" | "key" | "layout" | "style" | "items"
                )
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        match object.get("items") {
            Some(Value::Null) | None if rest.is_empty() => Vec::new(),
            Some(Value::Null) | None => vec![Value::Object(rest)],
            Some(Value::Object(item)) => vec![Value::Object(item.clone())],
            Some(other) => vec![other.clone()],
        }
    }
}

fn item_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(object) => object
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}

#[async_trait]
impl Component for StreamLeaf {
    fn tag(&self) -> &str {
        "stream"
    }

    fn parse(&mut self, raw: &Value) -> ParseOutcome {
        let Some(object) = raw.as_object() else {
            self.ready = false;
            return ParseOutcome::Invalid("expected an object".to_string());
        };

        if let Some(Value::Array(items)) = object.get("items") {
            self.items = items.clone();
            self.ready = true;
            return ParseOutcome::Valid;
        }

        match self.leniency {
            Leniency::Strict => {
                self.items.clear();
                self.ready = false;
                ParseOutcome::Invalid("missing `items` array".to_string())
            }
            Leniency::Coerce => {
                self.items = Self::coerce(object);
                self.ready = true;
                tracing::warn!("stream payload without `items`; coerced {} item(s)", self.items.len());
                ParseOutcome::Recovered(vec![format!(
                    "missing `items` array; coerced {} item(s)",
                    self.items.len()
                )])
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn render(&mut self, _scope: &RenderScope) -> Result<View, ComponentError> {
        if !self.ready {
            return Err(ComponentError::NotReady("stream".to_string()));
        }
        let lines: Vec<String> = self.items.iter().map(item_text).collect();
        Ok(View::new("stream")
            .text(lines.join("\n"))
            .attr("count", self.items.len().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_array_is_valid_in_both_modes() {
        for leniency in [Leniency::Strict, Leniency::Coerce] {
            let mut leaf = StreamLeaf::new(leniency);
            let outcome = leaf.parse(&json!({"component": "stream", "items": ["a", {"text": "b"}]}));
            assert_eq!(outcome, ParseOutcome::Valid);
            assert_eq!(leaf.items().len(), 2);
        }
    }

    #[test]
    fn test_strict_rejects_missing_items() {
        let mut leaf = StreamLeaf::new(Leniency::Strict);
        let outcome = leaf.parse(&json!({"component": "stream", "text": "hello"}));
        assert!(matches!(outcome, ParseOutcome::Invalid(_)));
        assert!(!leaf.is_ready());
    }

    #[test]
    fn test_coerce_wraps_loose_fields() {
        let mut leaf = StreamLeaf::new(Leniency::Coerce);
        let outcome = leaf.parse(&json!({"component": "stream", "id": "s", "text": "hello"}));
        assert!(matches!(outcome, ParseOutcome::Recovered(_)));
        assert_eq!(leaf.items(), &[json!({"text": "hello"})]);
        assert_eq!(item_text(&leaf.items()[0]), "hello");
    }

    #[test]
    fn test_coerce_wraps_scalar_items() {
        let mut leaf = StreamLeaf::new(Leniency::Coerce);
        let outcome = leaf.parse(&json!({"component": "stream", "items": "only"}));
        assert!(matches!(outcome, ParseOutcome::Recovered(_)));
        assert_eq!(leaf.items(), &[json!("only")]);

        let outcome = leaf.parse(&json!({"component": "stream"}));
        assert!(matches!(outcome, ParseOutcome::Recovered(_)));
        assert!(leaf.items().is_empty());
    }
}
