use crossrun_dom::{Document, NodeId, NodeKind};
use serde_json::Value;

/// How hard a query looks.
///
/// `Strict` anchors literal text and demands full containment in the
/// viewport. `Off` disables the visibility filter altogether.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Strictness {
    #[default]
    Loose,
    Strict,
    Off,
}

impl Strictness {
    pub fn from_arg(arg: Option<&Value>) -> Self {
        match arg {
            Some(Value::Bool(true)) => Strictness::Strict,
            Some(Value::Bool(false)) => Strictness::Off,
            _ => Strictness::Loose,
        }
    }

    pub fn exact_text(&self) -> bool {
        matches!(self, Strictness::Strict)
    }

    pub fn filters_visibility(&self) -> bool {
        !matches!(self, Strictness::Off)
    }
}

/// Outcome of resolving a Thing.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Nodes(Vec<NodeId>),
    Value(Value),
}

/// Short tag-like rendering of a node for error messages.
pub fn describe(doc: &Document, node: NodeId) -> String {
    match doc.node_kind(node) {
        Some(NodeKind::Element(element)) => {
            let mut out = format!("<{}", element.tag);
            for name in ["id", "class", "name", "type"] {
                if let Some(value) = element.attr(name) {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
            }
            out.push('>');
            out
        }
        Some(NodeKind::Text(text)) => format!("#text {:?}", text.trim()),
        Some(NodeKind::Document) => String::from("#document"),
        None => format!("detached node {}", node.0),
    }
}
