use crossrun_dom::{Document, NodeId};

/// Replaces the selection (or appends at the end) with `chunk` and moves the caret after it.
pub(crate) fn insert_at_selection(doc: &mut Document, node: NodeId, chunk: &str) {
    let Some(element) = doc.element_mut(node) else {
        return;
    };
    let current: Vec<char> = element.value.clone().unwrap_or_default().chars().collect();
    let len = current.len();
    let (start, end) = element
        .selection
        .map(|(s, e)| (s.min(len), e.min(len).max(s.min(len))))
        .unwrap_or((len, len));

    let mut next: String = current[..start].iter().collect();
    next.push_str(chunk);
    next.extend(current[end..].iter());
    let caret = start + chunk.chars().count();
    element.value = Some(next);
    element.selection = Some((caret, caret));
}

/// Drops the last character; returns false when the value was already empty.
pub(crate) fn remove_last(doc: &mut Document, node: NodeId) -> bool {
    let Some(element) = doc.element_mut(node) else {
        return false;
    };
    let mut value = element.value.clone().unwrap_or_default();
    if value.pop().is_none() {
        return false;
    }
    let caret = value.chars().count();
    element.value = Some(value);
    element.selection = Some((caret, caret));
    true
}

/// `input` where supported, else `change`.
pub(crate) fn notify_value_change(doc: &mut Document, node: NodeId) {
    let kind = if doc.capabilities.input_event {
        "input"
    } else {
        "change"
    };
    doc.dispatch(node, kind, true);
}
