use std::fmt;
use std::future::Future;
use std::str::FromStr;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{RelayError, RelayResult};

/// Regular expression preserved as source plus flags.
///
/// Serialized as `[source]` or `[source, flags]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    pub source: String,
    pub flags: String,
}

impl Pattern {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }

    fn to_value(&self) -> Value {
        if self.flags.is_empty() {
            json!([self.source])
        } else {
            json!([self.source, self.flags])
        }
    }

    fn from_items(items: &[Value]) -> Option<Self> {
        match items {
            [Value::String(source)] => Some(Self::new(source.clone(), "")),
            [Value::String(source), Value::String(flags)] => {
                Some(Self::new(source.clone(), flags.clone()))
            }
            _ => None,
        }
    }
}

/// Search value: literal text, a number, or a pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum TextValue {
    Text(String),
    Number(f64),
    Pattern(Pattern),
}

impl TextValue {
    pub fn from_value(value: &Value) -> RelayResult<Self> {
        match value {
            Value::String(text) => Ok(TextValue::Text(text.clone())),
            Value::Number(num) => num
                .as_f64()
                .map(TextValue::Number)
                .ok_or_else(|| RelayError::InvalidTool(format!("unsupported number {num}"))),
            Value::Array(items) => Pattern::from_items(items)
                .map(TextValue::Pattern)
                .ok_or_else(|| RelayError::InvalidTool(format!("malformed pattern {value}"))),
            other => Err(RelayError::InvalidTool(format!(
                "expected text, number or pattern, got {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TextValue::Text(text) => Value::String(text.clone()),
            TextValue::Number(num) => json!(num),
            TextValue::Pattern(pattern) => pattern.to_value(),
        }
    }

    /// Literal form of the value; `None` for patterns.
    pub fn literal(&self) -> Option<String> {
        match self {
            TextValue::Text(text) => Some(text.clone()),
            TextValue::Number(num) if num.fract() == 0.0 && num.abs() < 1e15 => {
                Some(format!("{}", *num as i64))
            }
            TextValue::Number(num) => Some(num.to_string()),
            TextValue::Pattern(_) => None,
        }
    }
}

impl From<&str> for TextValue {
    fn from(text: &str) -> Self {
        TextValue::Text(text.to_string())
    }
}

impl From<Pattern> for TextValue {
    fn from(pattern: Pattern) -> Self {
        TextValue::Pattern(pattern)
    }
}

impl fmt::Display for TextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextValue::Pattern(p) => write!(f, "/{}/{}", p.source, p.flags),
            other => f.write_str(&other.literal().unwrap_or_default()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThingKind {
    Text,
    Node,
    Nodes,
    Image,
    Css,
    Script,
    Font,
    Favicon,
    Doctype,
    Location,
    Manifest,
    Title,
    Window,
    Empty,
    Any,
}

impl ThingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThingKind::Text => "text",
            ThingKind::Node => "node",
            ThingKind::Nodes => "nodes",
            ThingKind::Image => "image",
            ThingKind::Css => "css",
            ThingKind::Script => "script",
            ThingKind::Font => "font",
            ThingKind::Favicon => "favicon",
            ThingKind::Doctype => "doctype",
            ThingKind::Location => "location",
            ThingKind::Manifest => "manifest",
            ThingKind::Title => "title",
            ThingKind::Window => "window",
            ThingKind::Empty => "empty",
            ThingKind::Any => "any",
        }
    }
}

impl FromStr for ThingKind {
    type Err = RelayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw {
            "text" => ThingKind::Text,
            "node" => ThingKind::Node,
            "nodes" => ThingKind::Nodes,
            "image" => ThingKind::Image,
            "css" => ThingKind::Css,
            "script" => ThingKind::Script,
            "font" => ThingKind::Font,
            "favicon" => ThingKind::Favicon,
            "doctype" => ThingKind::Doctype,
            "location" => ThingKind::Location,
            "manifest" => ThingKind::Manifest,
            "title" => ThingKind::Title,
            "window" => ThingKind::Window,
            "empty" => ThingKind::Empty,
            "any" => ThingKind::Any,
            other => return Err(RelayError::NotFound(format!("unknown search kind {other:?}"))),
        })
    }
}

impl fmt::Display for ThingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed reference to client-observable content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThing", into = "RawThing")]
pub enum Thing {
    Text(TextValue),
    Node(String),
    Nodes(String),
    Image(TextValue),
    Css(TextValue),
    Script(TextValue),
    Font(TextValue),
    Favicon(TextValue),
    Doctype(TextValue),
    Location(TextValue),
    Manifest(TextValue),
    Title(TextValue),
    Window(Option<String>),
    Empty,
    Any(TextValue),
}

impl Thing {
    pub fn text(value: impl Into<TextValue>) -> Self {
        Thing::Text(value.into())
    }

    pub fn node(selector: impl Into<String>) -> Self {
        Thing::Node(selector.into())
    }

    pub fn kind(&self) -> ThingKind {
        match self {
            Thing::Text(_) => ThingKind::Text,
            Thing::Node(_) => ThingKind::Node,
            Thing::Nodes(_) => ThingKind::Nodes,
            Thing::Image(_) => ThingKind::Image,
            Thing::Css(_) => ThingKind::Css,
            Thing::Script(_) => ThingKind::Script,
            Thing::Font(_) => ThingKind::Font,
            Thing::Favicon(_) => ThingKind::Favicon,
            Thing::Doctype(_) => ThingKind::Doctype,
            Thing::Location(_) => ThingKind::Location,
            Thing::Manifest(_) => ThingKind::Manifest,
            Thing::Title(_) => ThingKind::Title,
            Thing::Window(_) => ThingKind::Window,
            Thing::Empty => ThingKind::Empty,
            Thing::Any(_) => ThingKind::Any,
        }
    }

    /// Things that resolve to a single value rather than to nodes.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.kind(),
            ThingKind::Css
                | ThingKind::Script
                | ThingKind::Font
                | ThingKind::Favicon
                | ThingKind::Doctype
                | ThingKind::Location
                | ThingKind::Manifest
                | ThingKind::Title
                | ThingKind::Window
        )
    }

    pub fn from_parts(kind: ThingKind, value: &Value) -> RelayResult<Self> {
        let selector = |value: &Value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| RelayError::InvalidTool(format!("{kind} expects a selector")))
        };
        Ok(match kind {
            ThingKind::Text => Thing::Text(TextValue::from_value(value)?),
            ThingKind::Node => Thing::Node(selector(value)?),
            ThingKind::Nodes => Thing::Nodes(selector(value)?),
            ThingKind::Image => Thing::Image(TextValue::from_value(value)?),
            ThingKind::Css => Thing::Css(TextValue::from_value(value)?),
            ThingKind::Script => Thing::Script(TextValue::from_value(value)?),
            ThingKind::Font => Thing::Font(TextValue::from_value(value)?),
            ThingKind::Favicon => Thing::Favicon(TextValue::from_value(value)?),
            ThingKind::Doctype => Thing::Doctype(TextValue::from_value(value)?),
            ThingKind::Location => Thing::Location(TextValue::from_value(value)?),
            ThingKind::Manifest => Thing::Manifest(TextValue::from_value(value)?),
            ThingKind::Title => Thing::Title(TextValue::from_value(value)?),
            ThingKind::Window => Thing::Window(value.as_str().map(str::to_string)),
            ThingKind::Empty => Thing::Empty,
            ThingKind::Any => Thing::Any(TextValue::from_value(value)?),
        })
    }

    fn value(&self) -> Value {
        match self {
            Thing::Text(v)
            | Thing::Image(v)
            | Thing::Css(v)
            | Thing::Script(v)
            | Thing::Font(v)
            | Thing::Favicon(v)
            | Thing::Doctype(v)
            | Thing::Location(v)
            | Thing::Manifest(v)
            | Thing::Title(v)
            | Thing::Any(v) => v.to_value(),
            Thing::Node(sel) | Thing::Nodes(sel) => Value::String(sel.clone()),
            Thing::Window(name) => name.clone().map(Value::String).unwrap_or(Value::Null),
            Thing::Empty => Value::Null,
        }
    }

    /// Parses a JSON tool argument into a Thing.
    pub fn from_json(value: &Value) -> RelayResult<Self> {
        let raw: RawThing = serde_json::from_value(value.clone())?;
        Thing::try_from(raw)
    }

    pub fn to_json(&self) -> Value {
        json!({ "type": self.kind().as_str(), "value": self.value() })
    }
}

impl fmt::Display for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Value::Null => write!(f, "{}", self.kind()),
            value => write!(f, "{} {}", self.kind(), value),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct RawThing {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
}

impl TryFrom<RawThing> for Thing {
    type Error = RelayError;

    fn try_from(raw: RawThing) -> Result<Self, Self::Error> {
        let kind: ThingKind = raw.kind.parse()?;
        Thing::from_parts(kind, &raw.value)
    }
}

impl From<Thing> for RawThing {
    fn from(thing: Thing) -> Self {
        RawThing {
            kind: thing.kind().as_str().to_string(),
            value: thing.value(),
        }
    }
}

/// A Thing whose value is still being computed.
pub struct Deferred {
    kind: ThingKind,
    pending: BoxFuture<'static, RelayResult<Value>>,
}

impl Deferred {
    pub fn new<F>(kind: ThingKind, pending: F) -> Self
    where
        F: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        Self {
            kind,
            pending: pending.boxed(),
        }
    }

    pub fn kind(&self) -> ThingKind {
        self.kind
    }

    /// Waits for the value, then re-wraps it with the original kind.
    pub async fn settle(self) -> RelayResult<Thing> {
        let value = self.pending.await?;
        Thing::from_parts(self.kind, &value)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("kind", &self.kind).finish()
    }
}

/// Tool argument that may still be pending.
#[derive(Debug)]
pub enum ThingArg {
    Ready(Thing),
    Pending(Deferred),
}

impl ThingArg {
    pub async fn resolve(self) -> RelayResult<Thing> {
        match self {
            ThingArg::Ready(thing) => Ok(thing),
            ThingArg::Pending(deferred) => deferred.settle().await,
        }
    }
}

impl From<Thing> for ThingArg {
    fn from(thing: Thing) -> Self {
        ThingArg::Ready(thing)
    }
}

impl From<Deferred> for ThingArg {
    fn from(deferred: Deferred) -> Self {
        ThingArg::Pending(deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_thing_wire_shape() {
        let thing = Thing::text("Submit");
        assert_eq!(
            serde_json::to_value(&thing).unwrap(),
            json!({"type": "text", "value": "Submit"})
        );
    }

    #[test]
    fn patterns_serialize_as_arrays() {
        let bare = Thing::text(Pattern::new("^sub", ""));
        assert_eq!(bare.to_json(), json!({"type": "text", "value": ["^sub"]}));

        let flagged: Thing =
            serde_json::from_value(json!({"type": "title", "value": ["home", "i"]})).unwrap();
        assert_eq!(flagged, Thing::Title(Pattern::new("home", "i").into()));
    }

    #[test]
    fn unknown_kind_is_not_found() {
        let err = Thing::from_json(&json!({"type": "shadow", "value": "x"})).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("shadow"));
    }

    #[test]
    fn window_and_empty_need_no_value() {
        assert_eq!(
            Thing::from_json(&json!({"type": "window"})).unwrap(),
            Thing::Window(None)
        );
        assert_eq!(
            Thing::from_json(&json!({"type": "window", "value": "popup"})).unwrap(),
            Thing::Window(Some("popup".into()))
        );
        assert_eq!(Thing::from_json(&json!({"type": "empty"})).unwrap(), Thing::Empty);
    }

    #[test]
    fn numbers_render_without_fraction() {
        assert_eq!(TextValue::Number(42.0).literal().as_deref(), Some("42"));
        assert_eq!(TextValue::Number(1.5).literal().as_deref(), Some("1.5"));
    }

    #[tokio::test]
    async fn deferred_keeps_kind() {
        let deferred = Deferred::new(ThingKind::Node, async { Ok(json!("#late")) });
        let thing = ThingArg::from(deferred).resolve().await.unwrap();
        assert_eq!(thing, Thing::node("#late"));
    }

    #[tokio::test]
    async fn deferred_propagates_failure() {
        let deferred = Deferred::new(ThingKind::Text, async {
            Err(RelayError::Timeout("value never settled".into()))
        });
        let err = deferred.settle().await.unwrap_err();
        assert_eq!(err.name(), "TimeoutError");
    }
}
