use crossrun_core_types::{RelayError, RelayResult, TextValue, Thing};
use crossrun_dom::{Document, NodeId};
use serde_json::Value;
use tracing::trace;

use crate::judges::visible;
use crate::matcher::Matcher;
use crate::model::{describe, Resolved, Strictness};
use crate::text::{image_sources, matchable_text};

/// The document `within` points at: a named window, or `doc` itself.
pub fn target_document<'a>(doc: &'a Document, within: Option<&Thing>) -> RelayResult<&'a Document> {
    match within {
        Some(Thing::Window(Some(name))) => doc
            .windows
            .get(name)
            .ok_or_else(|| RelayError::NotFound(format!("no window named {name:?}"))),
        _ => Ok(doc),
    }
}

/// Resolves a Thing to nodes, or to a value for scalar kinds.
pub fn resolve(
    doc: &Document,
    thing: &Thing,
    within: Option<&Thing>,
    strictness: Strictness,
) -> RelayResult<Resolved> {
    let target = target_document(doc, within)?;
    if thing.is_scalar() {
        return scalar(target, thing, strictness).map(Resolved::Value);
    }
    find(doc, thing, within, strictness).map(Resolved::Nodes)
}

/// Matching nodes in document order; `NotFound` when there are none.
pub fn find(
    doc: &Document,
    thing: &Thing,
    within: Option<&Thing>,
    strictness: Strictness,
) -> RelayResult<Vec<NodeId>> {
    let target = target_document(doc, within)?;
    let scope = match within {
        None | Some(Thing::Window(_)) => vec![target.body()],
        Some(scope_thing) => scope_roots(target, scope_thing, strictness)?,
    };

    let keep = |node: &NodeId| !strictness.filters_visibility() || shown(target, *node, strictness);
    let hits: Vec<NodeId> = match thing {
        Thing::Node(selector) | Thing::Nodes(selector) => {
            let mut out = Vec::new();
            for root in &scope {
                let mut found = target
                    .query_selector_all(*root, selector)
                    .map_err(|err| RelayError::InvalidTool(err.to_string()))?;
                found.retain(&keep);
                out.extend(found);
            }
            dedupe(out)
        }
        Thing::Text(value) | Thing::Image(value) | Thing::Any(value) => {
            let matcher = Matcher::build(value, strictness.exact_text())?;
            let wants_text = matches!(thing, Thing::Text(_) | Thing::Any(_));
            let wants_image = matches!(thing, Thing::Image(_) | Thing::Any(_));
            let matched = candidates(target, &scope, within.is_some())
                .into_iter()
                .filter(|node| {
                    (wants_text && matcher.is_match(&matchable_text(target, *node)))
                        || (wants_image
                            && image_sources(target, *node)
                                .iter()
                                .any(|src| matcher.is_match(src)))
                })
                .collect();
            let mut specific = without_ancestors(target, matched);
            specific.retain(&keep);
            specific
        }
        Thing::Empty => {
            let matched = candidates(target, &scope, within.is_some())
                .into_iter()
                .filter(|node| is_empty(target, *node))
                .collect();
            let mut specific = without_ancestors(target, matched);
            specific.retain(&keep);
            specific
        }
        scalar_kind => {
            return Err(RelayError::InvalidTool(format!(
                "{} resolves to a value, not to nodes",
                scalar_kind.kind()
            )))
        }
    };

    trace!(thing = %thing, hits = hits.len(), "resolved nodes");
    if hits.is_empty() {
        return Err(RelayError::NotFound(format!("{thing} not found")));
    }
    Ok(hits)
}

fn scope_roots(doc: &Document, scope: &Thing, strictness: Strictness) -> RelayResult<Vec<NodeId>> {
    let roots = match scope {
        Thing::Node(selector) | Thing::Nodes(selector) => {
            let mut found = doc
                .query_selector_all(doc.root(), selector)
                .map_err(|err| RelayError::InvalidTool(err.to_string()))?;
            if strictness.filters_visibility() {
                found.retain(|node| shown(doc, *node, strictness));
            }
            found
        }
        other => find(doc, other, None, strictness)?,
    };
    if roots.is_empty() {
        return Err(RelayError::NotFound(format!("{scope} not found")));
    }
    Ok(roots)
}

/// On screen: strict lookups want the whole box inside the viewport.
fn shown(doc: &Document, node: NodeId, strictness: Strictness) -> bool {
    visible(doc, node, matches!(strictness, Strictness::Strict))
}

/// Elements under the scope roots in document order. Scope roots given
/// explicitly are candidates themselves.
fn candidates(doc: &Document, roots: &[NodeId], include_roots: bool) -> Vec<NodeId> {
    let mut out = Vec::new();
    for root in roots {
        if include_roots && doc.is_element(*root) {
            out.push(*root);
        }
        out.extend(doc.descendant_elements(*root));
    }
    dedupe(out)
}

fn dedupe(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = std::collections::HashSet::new();
    nodes.retain(|node| seen.insert(*node));
    nodes
}

/// Drops every node that contains another surviving match.
fn without_ancestors(doc: &Document, matched: Vec<NodeId>) -> Vec<NodeId> {
    matched
        .iter()
        .copied()
        .filter(|node| !matched.iter().any(|other| doc.is_ancestor(*node, *other)))
        .collect()
}

fn is_empty(doc: &Document, node: NodeId) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    if element.is_form_control() {
        return element.value.as_deref().unwrap_or_default().is_empty();
    }
    let childless = !doc.children(node).iter().any(|c| doc.is_element(*c));
    childless && matchable_text(doc, node).trim().is_empty()
}

fn as_refs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

fn single(item: &Option<String>) -> Vec<&str> {
    item.as_deref().into_iter().collect()
}

fn scalar(doc: &Document, thing: &Thing, strictness: Strictness) -> RelayResult<Value> {
    let exact = strictness.exact_text();
    let first_match = |value: &TextValue, pool: &[&str]| -> RelayResult<Value> {
        let matcher = Matcher::build(value, exact)?;
        pool.iter()
            .find(|entry| matcher.is_match(entry))
            .map(|entry| Value::String(entry.to_string()))
            .ok_or_else(|| RelayError::NotFound(format!("{thing} not found")))
    };

    match thing {
        Thing::Title(value) => first_match(value, &[doc.title.as_str()]),
        Thing::Location(value) => first_match(value, &[doc.location.as_str()]),
        Thing::Doctype(value) => first_match(value, &single(&doc.doctype)),
        Thing::Manifest(value) => first_match(value, &single(&doc.manifest)),
        Thing::Favicon(value) => first_match(value, &single(&doc.favicon)),
        Thing::Css(value) => first_match(value, &as_refs(&doc.stylesheets)),
        Thing::Script(value) => first_match(value, &as_refs(&doc.scripts)),
        Thing::Font(value) => first_match(value, &as_refs(&doc.fonts)),
        Thing::Window(name) => match name {
            None => Ok(Value::String(doc.location.clone())),
            Some(name) => doc
                .windows
                .get(name)
                .map(|window| Value::String(window.location.clone()))
                .ok_or_else(|| RelayError::NotFound(format!("no window named {name:?}"))),
        },
        other => Err(RelayError::InvalidTool(format!(
            "{} resolves to nodes, not to a value",
            other.kind()
        ))),
    }
}

/// Descriptions of resolved nodes, for replies.
pub fn describe_all(doc: &Document, nodes: &[NodeId]) -> Value {
    Value::Array(
        nodes
            .iter()
            .map(|node| Value::String(describe(doc, *node)))
            .collect(),
    )
}
