use crossrun_core_types::{RelayError, RelayResult};
use crossrun_dom::{Document, NodeId};
use tracing::debug;

use crate::model::{describe, Strictness};

/// Rendered with a positive width and no hidden ancestor; ignores the viewport.
pub fn displayed(doc: &Document, node: NodeId) -> bool {
    let has_offset_parent = node == doc.body() || doc.is_rendered(node);
    has_offset_parent && doc.rect(node).width > 0.0 && !doc.is_visibility_hidden(node)
}

/// Displayed and intersecting the viewport, or fully inside it when `contained`.
pub fn visible(doc: &Document, node: NodeId, contained: bool) -> bool {
    if !displayed(doc, node) {
        return false;
    }
    let rect = doc.rect(node);
    if contained {
        rect.contained_in(&doc.viewport)
    } else {
        rect.intersects(&doc.viewport)
    }
}

fn hits_self(doc: &Document, node: NodeId, hit: NodeId) -> bool {
    hit == node || doc.is_ancestor(node, hit) || doc.is_ancestor(hit, node)
}

fn center_hit(doc: &Document, node: NodeId) -> Option<NodeId> {
    let (x, y) = doc.rect(node).center();
    doc.element_at(x, y)
}

pub fn reachable(doc: &Document, node: NodeId) -> bool {
    center_hit(doc, node).is_some_and(|hit| hits_self(doc, node, hit))
}

/// Picks the node a user could actually interact with.
///
/// The first candidate wins when the element at its center is itself, a
/// descendant or an ancestor. Otherwise another candidate is preferred when
/// it shares no ancestor with the occluder below `body`; failing that the
/// first candidate is reported as covered.
pub fn reach(doc: &Document, candidates: &[NodeId], strictness: Strictness) -> RelayResult<NodeId> {
    let Some(&first) = candidates.first() else {
        return Err(RelayError::NotFound("nothing to reach".into()));
    };
    let contained = strictness.exact_text();
    if strictness.filters_visibility() && !visible(doc, first, contained) {
        return Err(RelayError::NotVisible(format!(
            "{} is not visible",
            describe(doc, first)
        )));
    }

    let Some(hit) = center_hit(doc, first) else {
        return Err(RelayError::NotVisible(format!(
            "{} is outside the viewport",
            describe(doc, first)
        )));
    };
    if hits_self(doc, first, hit) {
        return Ok(first);
    }

    let top_level = [doc.root(), doc.html(), doc.body()];
    let alternate = candidates.iter().skip(1).copied().find(|other| {
        let unrelated = doc
            .common_ancestor(*other, hit)
            .map_or(true, |lca| top_level.contains(&lca));
        unrelated && visible(doc, *other, contained) && reachable(doc, *other)
    });
    if let Some(other) = alternate {
        debug!(
            covered = %describe(doc, first),
            chosen = %describe(doc, other),
            "preferring unoccluded candidate"
        );
        return Ok(other);
    }

    Err(RelayError::Covered {
        target: describe(doc, first),
        by: describe(doc, hit),
    })
}
