use crossrun_core_types::RelayResult;
use crossrun_dom::{Document, NodeId, NodeKind};
use tracing::debug;

use crate::precheck::ensure_enabled;

/// Text nodes act through their parent element.
fn element_or_parent(doc: &Document, node: NodeId) -> NodeId {
    match doc.node_kind(node) {
        Some(NodeKind::Text(_)) => doc.parent(node).unwrap_or(node),
        _ => node,
    }
}

/// Moves the pointer onto `target`, leaving whatever was hovered before.
pub fn hover(doc: &mut Document, target: NodeId) {
    let target = element_or_parent(doc, target);
    if doc.hovered() == Some(target) {
        return;
    }
    if let Some(previous) = doc.hovered() {
        doc.dispatch(previous, "mouseout", true);
        doc.dispatch(previous, "mouseleave", true);
    }
    doc.set_hovered(Some(target));
    doc.dispatch(target, "mouseover", true);
    doc.dispatch(target, "mouseenter", true);
}

/// Hover, enabled check, mousedown, focus, mouseup, then activation.
pub fn click(doc: &mut Document, target: NodeId) -> RelayResult<()> {
    let element = element_or_parent(doc, target);
    hover(doc, element);
    ensure_enabled(doc, element)?;
    doc.dispatch(element, "mousedown", true);
    doc.focus(element);
    doc.dispatch(element, "mouseup", true);
    activate(doc, target);
    Ok(())
}

pub fn dblclick(doc: &mut Document, target: NodeId) -> RelayResult<()> {
    let element = element_or_parent(doc, target);
    hover(doc, element);
    ensure_enabled(doc, element)?;
    doc.dispatch(element, "mousedown", true);
    doc.focus(element);
    doc.dispatch(element, "mouseup", true);
    doc.dispatch(element, "mousedown", true);
    doc.dispatch(element, "mouseup", true);
    doc.dispatch(element, "dblclick", true);
    Ok(())
}

/// Native `click()` on the node or its parent; a synthetic click otherwise.
fn activate(doc: &mut Document, target: NodeId) {
    if doc.is_element(target) {
        doc.activate(target);
        return;
    }
    match doc.parent(target).filter(|p| doc.is_element(*p)) {
        Some(parent) => doc.activate(parent),
        None => {
            debug!(?target, "no native click available, synthesizing");
            doc.dispatch(target, "click", true);
        }
    }
}
