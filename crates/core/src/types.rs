use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const MESSAGE_TYPE: &str = "message";
pub const PATCH_TYPE: &str = "patch";
pub const UI_TYPE: &str = "ui";
pub const USER_MESSAGE_TYPE: &str = "user_message";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Malformed node: {0}")]
    MalformedNode(String),
    #[error("Malformed patch: {0}")]
    MalformedPatch(String),
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Invalid reconnect policy: {0}")]
    InvalidPolicy(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeRoute {
    Render,
    Patch,
    Event,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            id: None,
        }
    }

    pub fn message(payload: Value) -> Self {
        Self::new(MESSAGE_TYPE, payload)
    }

    pub fn patch(patch: &Patch) -> Result<Self, CoreError> {
        Ok(Self::new(PATCH_TYPE, serde_json::to_value(patch)?))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn route(&self) -> EnvelopeRoute {
        match self.kind.as_str() {
            MESSAGE_TYPE | UI_TYPE => EnvelopeRoute::Render,
            PATCH_TYPE => EnvelopeRoute::Patch,
            _ => EnvelopeRoute::Event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Update,
    Remove,
}

/// A single structural edit against a rendered tree.
///
/// `value` stays raw JSON so that a malformed node degrades to an error leaf
/// instead of rejecting the whole patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub op: PatchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl Patch {
    pub fn add(value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: None,
            target_id: None,
            value,
        }
    }

    pub fn add_under(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::add(value)
        }
    }

    pub fn update(target_id: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Update,
            path: None,
            target_id: Some(target_id.into()),
            value,
        }
    }

    pub fn remove(target_id: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: None,
            target_id: Some(target_id.into()),
            value: Value::Null,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        serde_json::from_value(value.clone()).map_err(|e| CoreError::MalformedPatch(e.to_string()))
    }

    pub fn path_segments(&self) -> Vec<&str> {
        self.path
            .as_deref()
            .map(|p| p.split('/').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Box,
    Card,
    Grid,
    Tabs,
    Collapsible,
    Table,
    Link,
    Text,
    Image,
    Icon,
    Badge,
    Button,
    Progress,
    Divider,
    Chart,
    Loading,
    CodeBlock,
    Stream,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 18] = [
        ComponentKind::Box,
        ComponentKind::Card,
        ComponentKind::Grid,
        ComponentKind::Tabs,
        ComponentKind::Collapsible,
        ComponentKind::Table,
        ComponentKind::Link,
        ComponentKind::Text,
        ComponentKind::Image,
        ComponentKind::Icon,
        ComponentKind::Badge,
        ComponentKind::Button,
        ComponentKind::Progress,
        ComponentKind::Divider,
        ComponentKind::Chart,
        ComponentKind::Loading,
        ComponentKind::CodeBlock,
        ComponentKind::Stream,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ComponentKind::Box => "box",
            ComponentKind::Card => "card",
            ComponentKind::Grid => "grid",
            ComponentKind::Tabs => "tabs",
            ComponentKind::Collapsible => "collapsible",
            ComponentKind::Table => "table",
            ComponentKind::Link => "link",
            ComponentKind::Text => "text",
            ComponentKind::Image => "image",
            ComponentKind::Icon => "icon",
            ComponentKind::Badge => "badge",
            ComponentKind::Button => "button",
            ComponentKind::Progress => "progress",
            ComponentKind::Divider => "divider",
            ComponentKind::Chart => "chart",
            ComponentKind::Loading => "loading",
            ComponentKind::CodeBlock => "code-block",
            ComponentKind::Stream => "stream",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ComponentKind::Box
                | ComponentKind::Card
                | ComponentKind::Grid
                | ComponentKind::Tabs
                | ComponentKind::Collapsible
                | ComponentKind::Table
                | ComponentKind::Link
        )
    }
}

/// One declarative node. Fields other than the common metadata are kept in
/// `props` and interpreted by the component implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl ComponentNode {
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedNode(format!("expected object, got {}", kind_of(value))))?;
        match object.get("component") {
            Some(Value::String(tag)) if !tag.is_empty() => {}
            Some(_) => {
                return Err(CoreError::MalformedNode(
                    "`component` must be a non-empty string".to_string(),
                ))
            }
            None => return Err(CoreError::MalformedNode("missing `component` tag".to_string())),
        }
        serde_json::from_value(value.clone()).map_err(|e| CoreError::MalformedNode(e.to_string()))
    }

    pub fn kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_tag(&self.component)
    }

    pub fn child_values(&self) -> Vec<&Value> {
        child_values(&self.props)
    }
}

/// Collects nested node descriptions from the container-typed fields of a
/// node object: `children`, and `tabs[*].children`.
pub fn child_values(object: &Map<String, Value>) -> Vec<&Value> {
    let mut out = Vec::new();
    if let Some(Value::Array(children)) = object.get("children") {
        out.extend(children.iter());
    }
    if let Some(Value::Array(tabs)) = object.get("tabs") {
        for tab in tabs {
            if let Some(Value::Array(children)) = tab.get("children") {
                out.extend(children.iter());
            }
        }
    }
    out
}

/// Normalizes a UI description payload into an ordered node list.
pub fn node_list(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Exponential backoff parameters. Durations are carried in milliseconds on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay: u64,
    /// Upper bound of the extra delay, as a fraction of the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-indexed), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    /// Delay with jitter applied. `sample` must lie in `[0, 1)`; the result
    /// never undercuts the unjittered delay.
    pub fn delay_for(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay_for(attempt);
        base + base.mul_f64(unit(self.jitter) * unit(sample))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(CoreError::InvalidPolicy(format!(
                "jitter must be a non-negative number, got {}",
                self.jitter
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(CoreError::InvalidPolicy(format!(
                "baseDelay {}ms exceeds maxDelay {}ms",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseEndpoints {
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    #[serde(rename = "sendURL", default, skip_serializing_if = "Option::is_none")]
    pub send_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    #[serde(rename_all = "camelCase")]
    Websocket {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconnect_policy: Option<ReconnectPolicy>,
    },
    Sse {
        #[serde(rename = "streamURL")]
        stream_url: String,
        #[serde(rename = "sendURL", default, skip_serializing_if = "Option::is_none")]
        send_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Auto {
        ws_url: String,
        sse: SseEndpoints,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconnect_policy: Option<ReconnectPolicy>,
    },
}

impl TransportOptions {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match self {
            TransportOptions::Websocket {
                reconnect_policy, ..
            }
            | TransportOptions::Auto {
                reconnect_policy, ..
            } => reconnect_policy.clone().unwrap_or_default(),
            TransportOptions::Sse { .. } => ReconnectPolicy::default(),
        }
    }

    /// Checks that every endpoint parses as an absolute URL and that the
    /// reconnect policy is usable.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            TransportOptions::Websocket { url, .. } => check_url(url)?,
            TransportOptions::Sse {
                stream_url,
                send_url,
            } => check_endpoints(&SseEndpoints {
                stream_url: stream_url.clone(),
                send_url: send_url.clone(),
            })?,
            TransportOptions::Auto { ws_url, sse, .. } => {
                check_url(ws_url)?;
                check_endpoints(sse)?;
            }
        }
        self.reconnect_policy().validate()
    }
}

fn check_endpoints(endpoints: &SseEndpoints) -> Result<(), CoreError> {
    check_url(&endpoints.stream_url)?;
    if let Some(send_url) = &endpoints.send_url {
        check_url(send_url)?;
    }
    Ok(())
}

fn check_url(raw: &str) -> Result<(), CoreError> {
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|e| CoreError::InvalidEndpoint {
            url: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_routes() {
        assert_eq!(Envelope::message(json!({})).route(), EnvelopeRoute::Render);
        assert_eq!(
            Envelope::patch(&Patch::remove("x")).unwrap().route(),
            EnvelopeRoute::Patch
        );
        assert_eq!(Envelope::new("status", json!(1)).route(), EnvelopeRoute::Event);
    }

    #[test]
    fn test_patch_wire_shape() {
        let patch: Patch = serde_json::from_value(json!({
            "op": "update",
            "targetId": "b1",
            "value": {"component": "badge", "id": "b1", "text": "changed"}
        }))
        .unwrap();
        assert_eq!(patch.op, PatchOp::Update);
        assert_eq!(patch.target_id.as_deref(), Some("b1"));

        let remove: Patch = serde_json::from_value(json!({"op": "remove", "targetId": "b1"})).unwrap();
        assert!(remove.value.is_null());
        assert!(remove.path_segments().is_empty());

        let nested = Patch::add_under("/outer/inner", json!({}));
        assert_eq!(nested.path_segments(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_node_requires_component() {
        assert!(ComponentNode::from_value(&json!({"id": "x"})).is_err());
        assert!(ComponentNode::from_value(&json!("text")).is_err());
        assert!(ComponentNode::from_value(&json!({"component": 3})).is_err());

        let node = ComponentNode::from_value(&json!({
            "component": "box",
            "key": "k",
            "children": [{"component": "text", "text": "a"}]
        }))
        .unwrap();
        assert_eq!(node.kind(), Some(ComponentKind::Box));
        assert_eq!(node.key.as_deref(), Some("k"));
        assert_eq!(node.child_values().len(), 1);
    }

    #[test]
    fn test_tabs_children_are_collected() {
        let node = ComponentNode::from_value(&json!({
            "component": "tabs",
            "tabs": [
                {"label": "one", "children": [{"component": "text"}]},
                {"label": "two", "children": [{"component": "badge"}, {"component": "chart"}]}
            ]
        }))
        .unwrap();
        assert_eq!(node.child_values().len(), 3);
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: 100,
            max_delay: 1_000,
            jitter: 0.5,
        };
        assert_eq!(policy.base_delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(4, 0.0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(4, 1.0), Duration::from_millis(1_500));
    }

    #[test]
    fn test_unusable_policies_are_rejected() {
        let nan = ReconnectPolicy {
            jitter: f64::NAN,
            ..ReconnectPolicy::default()
        };
        assert!(matches!(nan.validate(), Err(CoreError::InvalidPolicy(_))));
        assert_eq!(nan.delay_for(0, 0.5), Duration::from_millis(500));

        let inverted = ReconnectPolicy {
            base_delay: 5_000,
            max_delay: 100,
            ..ReconnectPolicy::default()
        };
        assert!(matches!(inverted.validate(), Err(CoreError::InvalidPolicy(_))));
        assert!(ReconnectPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_transport_options_wire_shapes() {
        let ws: TransportOptions = serde_json::from_value(json!({
            "type": "websocket",
            "url": "ws://localhost:9000/ui",
            "reconnectPolicy": {"maxAttempts": 3, "baseDelay": 50, "maxDelay": 400, "jitter": 0.1}
        }))
        .unwrap();
        assert_eq!(ws.reconnect_policy().max_attempts, 3);

        let sse: TransportOptions = serde_json::from_value(json!({
            "type": "sse",
            "streamURL": "http://localhost:9000/stream",
            "sendURL": "http://localhost:9000/send"
        }))
        .unwrap();
        assert!(matches!(sse, TransportOptions::Sse { ref send_url, .. } if send_url.is_some()));

        let auto: TransportOptions = serde_json::from_value(json!({
            "type": "auto",
            "wsUrl": "ws://localhost:9000/ui",
            "sse": {"streamURL": "http://localhost:9000/stream", "sendURL": "http://localhost:9000/send"}
        }))
        .unwrap();
        assert!(auto.validate().is_ok());
        assert_eq!(auto.reconnect_policy(), ReconnectPolicy::default());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let options = TransportOptions::Websocket {
            url: "not a url".to_string(),
            reconnect_policy: None,
        };
        assert!(matches!(
            options.validate(),
            Err(CoreError::InvalidEndpoint { .. })
        ));
    }
}
