use crossrun_core_types::{RelayError, RelayResult};
use crossrun_dom::{Document, NodeId};
use crossrun_perceiver::describe;

/// Fails when the node or any ancestor carries `disabled`.
pub fn ensure_enabled(doc: &Document, node: NodeId) -> RelayResult<()> {
    let disabled = std::iter::once(node)
        .chain(doc.ancestors(node))
        .find(|n| doc.element(*n).is_some_and(|e| e.is_disabled()));
    match disabled {
        Some(owner) if owner == node => Err(RelayError::Precondition(format!(
            "{} is disabled",
            describe(doc, node)
        ))),
        Some(owner) => Err(RelayError::Precondition(format!(
            "{} is disabled by {}",
            describe(doc, node),
            describe(doc, owner)
        ))),
        None => Ok(()),
    }
}

/// Text entry needs an enabled, writable input or textarea.
pub fn ensure_editable(doc: &Document, node: NodeId) -> RelayResult<()> {
    let Some(element) = doc.element(node) else {
        return Err(RelayError::Precondition(format!(
            "{} is not an element",
            describe(doc, node)
        )));
    };
    if !element.is_text_editable() {
        return Err(RelayError::Precondition(format!(
            "{} does not accept text",
            describe(doc, node)
        )));
    }
    if element.is_readonly() {
        return Err(RelayError::Precondition(format!(
            "{} is read-only",
            describe(doc, node)
        )));
    }
    ensure_enabled(doc, node)
}

/// The explicit target, else the focused element.
pub fn active_target(doc: &Document, target: Option<NodeId>) -> RelayResult<NodeId> {
    target
        .or_else(|| doc.focused())
        .ok_or_else(|| RelayError::Precondition("no active element".into()))
}
