use std::fmt;
use std::sync::Arc;

use crate::document::Document;
use crate::node::NodeId;

/// One event dispatched into the document, recorded in dispatch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomEvent {
    pub target: NodeId,
    pub kind: &'static str,
    /// Synthesized by the relay rather than produced by a native method.
    pub synthetic: bool,
}

pub type ListenerFn = Arc<dyn Fn(&mut Document, &DomEvent) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) node: NodeId,
    pub(crate) kind: &'static str,
    pub(crate) handler: ListenerFn,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("node", &self.node)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Events that do not bubble to ancestors.
pub(crate) fn bubbles(kind: &str) -> bool {
    !matches!(kind, "mouseenter" | "mouseleave" | "focus" | "blur")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    To(String),
    Reload,
}
