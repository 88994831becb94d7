use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::events::{bubbles, ConsoleLine, DomEvent, Listener, ListenerFn, Navigation};
use crate::node::{Element, Node, NodeId, NodeKind};
use crate::style::{Display, Rect, Style, TextTransform, Visibility};

const LINE_HEIGHT: f64 = 20.0;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReadyState {
    Loading,
    Interactive,
    #[default]
    Complete,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Loading => "loading",
            ReadyState::Interactive => "interactive",
            ReadyState::Complete => "complete",
        }
    }
}

/// Browser features a page may lack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    pub selectors_api: bool,
    pub history_api: bool,
    pub input_event: bool,
    pub indexed_db_enumeration: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            selectors_api: true,
            history_api: true,
            input_event: true,
            indexed_db_enumeration: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Storage {
    pub cookies: BTreeMap<String, String>,
    pub local: BTreeMap<String, String>,
    pub session: BTreeMap<String, String>,
    pub indexed_db: Vec<String>,
}

/// A loaded page: node tree plus the window state around it.
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    pub viewport: Rect,
    focused: Option<NodeId>,
    hovered: Option<NodeId>,
    pub title: String,
    pub location: String,
    pub doctype: Option<String>,
    pub manifest: Option<String>,
    pub stylesheets: Vec<String>,
    pub scripts: Vec<String>,
    pub fonts: Vec<String>,
    pub favicon: Option<String>,
    pub ready_state: ReadyState,
    pub storage: Storage,
    pub capabilities: Capabilities,
    /// Named browsing contexts reachable from this window.
    pub windows: BTreeMap<String, Document>,
    pub console: Vec<ConsoleLine>,
    events: Vec<DomEvent>,
    listeners: Vec<Listener>,
    navigation: Option<Navigation>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("location", &self.location)
            .field("title", &self.title)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Document {
    pub fn new(location: impl Into<String>) -> Self {
        let mut doc = Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            root: NodeId(0),
            html: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            viewport: Rect::new(0.0, 0.0, 1024.0, 768.0),
            focused: None,
            hovered: None,
            title: String::new(),
            location: location.into(),
            doctype: Some("html".to_string()),
            manifest: None,
            stylesheets: Vec::new(),
            scripts: Vec::new(),
            fonts: Vec::new(),
            favicon: None,
            ready_state: ReadyState::Complete,
            storage: Storage::default(),
            capabilities: Capabilities::default(),
            windows: BTreeMap::new(),
            console: Vec::new(),
            events: Vec::new(),
            listeners: Vec::new(),
            navigation: None,
        };
        doc.html = doc.push_node(doc.root, NodeKind::Element(Element::new("html", &[])));
        doc.head = doc.push_node(doc.html, NodeKind::Element(Element::new("head", &[])));
        doc.body = doc.push_node(doc.html, NodeKind::Element(Element::new("body", &[])));
        doc.layout();
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    fn push_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.push_node(parent, NodeKind::Element(Element::new(tag, attrs)));
        self.layout();
        id
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.push_node(parent, NodeKind::Text(text.to_string()));
        self.layout();
        id
    }

    /// Detaches `node` (and its subtree) from the tree.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|child| *child != node);
        }
        if self.focused.is_some_and(|f| f == node || self.is_ancestor(node, f)) {
            self.focused = None;
        }
        self.layout();
    }

    pub fn node_kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(node.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(node), move |n| self.parent(*n))
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|a| a == ancestor)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        node == self.root || self.ancestors(node).any(|a| a == self.root)
    }

    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let chain: Vec<NodeId> = std::iter::once(a).chain(self.ancestors(a)).collect();
        std::iter::once(b)
            .chain(self.ancestors(b))
            .find(|candidate| chain.contains(candidate))
    }

    pub fn previous_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|s| *s == node)?;
        siblings[..pos]
            .iter()
            .rev()
            .copied()
            .find(|s| self.is_element(*s))
    }

    pub fn descendant_elements(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for child in self.children(node) {
            self.collect_elements_dfs(*child, &mut out);
        }
        out
    }

    fn collect_elements_dfs(&self, node: NodeId, out: &mut Vec<NodeId>) {
        if self.is_element(node) {
            out.push(node);
        }
        for child in self.children(node) {
            self.collect_elements_dfs(*child, out);
        }
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(element) = self.element_mut(node) {
            element
                .attrs
                .insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let Some(element) = self.element_mut(node) {
            element.attrs.remove(&name.to_ascii_lowercase());
        }
    }

    pub fn set_style(&mut self, node: NodeId, update: impl FnOnce(&mut Style)) {
        if let Some(element) = self.element_mut(node) {
            update(&mut element.style);
        }
        self.layout();
    }

    /// Pins the element to an absolute box, taking it out of flow.
    pub fn place(&mut self, node: NodeId, rect: Rect) {
        if let Some(element) = self.element_mut(node) {
            element.placed = Some(rect);
        }
        self.layout();
    }

    pub fn set_pseudo(&mut self, node: NodeId, before: Option<&str>, after: Option<&str>) {
        if let Some(element) = self.element_mut(node) {
            element.before.content = before.map(str::to_string);
            element.after.content = after.map(str::to_string);
        }
    }

    pub fn value(&self, node: NodeId) -> Option<&str> {
        self.element(node).and_then(|e| e.value.as_deref())
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) {
        if let Some(element) = self.element_mut(node) {
            element.value = Some(value.to_string());
            element.selection = None;
        }
    }

    pub fn rect(&self, node: NodeId) -> Rect {
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Element(element)) => element.layout,
            Some(NodeKind::Text(_)) => self.parent(node).map(|p| self.rect(p)).unwrap_or_default(),
            _ => self.viewport,
        }
    }

    /// Block layout: in-flow elements stack vertically at their parent's width.
    pub fn layout(&mut self) {
        let viewport = self.viewport;
        self.flow(self.html, viewport.x, viewport.y, viewport.width);
        for root in [self.html, self.body] {
            if let Some(element) = self.element_mut(root) {
                if element.placed.is_none() {
                    element.layout.height = element.layout.height.max(viewport.height);
                }
            }
        }
    }

    fn flow(&mut self, node: NodeId, x: f64, y: f64, width: f64) -> f64 {
        let children = self.children(node).to_vec();
        let (display, placed, leaf_height) = match &self.nodes[node.0].kind {
            NodeKind::Text(text) => {
                return if text.trim().is_empty() { 0.0 } else { LINE_HEIGHT };
            }
            NodeKind::Document => (Display::Block, None, 0.0),
            NodeKind::Element(element) => {
                let leaf = if element.is_form_control()
                    || matches!(element.tag.as_str(), "img" | "button")
                    || element.before.content.is_some()
                    || element.after.content.is_some()
                {
                    LINE_HEIGHT
                } else {
                    0.0
                };
                (element.style.display, element.placed, leaf)
            }
        };

        if display == Display::None {
            self.set_layout(node, Rect::new(x, y, 0.0, 0.0));
            for child in children {
                self.flow(child, x, y, 0.0);
            }
            return 0.0;
        }

        if let Some(rect) = placed {
            self.set_layout(node, rect);
            let mut cursor = rect.y;
            for child in children {
                cursor += self.flow(child, rect.x, cursor, rect.width);
            }
            return 0.0;
        }

        let mut cursor = y;
        for child in children {
            cursor += self.flow(child, x, cursor, width);
        }
        let height = (cursor - y).max(leaf_height);
        self.set_layout(node, Rect::new(x, y, width, height));
        height
    }

    fn set_layout(&mut self, node: NodeId, rect: Rect) {
        if let Some(element) = self.element_mut(node) {
            element.layout = rect;
        }
    }

    /// No `display: none` on the node or any ancestor.
    pub fn is_rendered(&self, node: NodeId) -> bool {
        std::iter::once(node)
            .chain(self.ancestors(node))
            .all(|n| {
                self.element(n)
                    .map(|e| e.style.display != Display::None)
                    .unwrap_or(true)
            })
            && self.is_connected(node)
    }

    /// `visibility: hidden` on the node or any ancestor.
    pub fn is_visibility_hidden(&self, node: NodeId) -> bool {
        std::iter::once(node).chain(self.ancestors(node)).any(|n| {
            self.element(n)
                .is_some_and(|e| e.style.visibility == Visibility::Hidden)
        })
    }

    fn stacking_z(&self, node: NodeId) -> i32 {
        std::iter::once(node)
            .chain(self.ancestors(node))
            .find_map(|n| self.element(n).and_then(|e| e.style.z_index))
            .unwrap_or(0)
    }

    /// Topmost hit-testable element at a viewport point.
    pub fn element_at(&self, x: f64, y: f64) -> Option<NodeId> {
        if !self.viewport.contains_point(x, y) {
            return None;
        }
        let mut best: Option<(i32, NodeId)> = None;
        for node in self.descendant_elements(self.root) {
            let Some(element) = self.element(node) else {
                continue;
            };
            if !element.style.pointer_events
                || !element.layout.contains_point(x, y)
                || !self.is_rendered(node)
                || self.is_visibility_hidden(node)
            {
                continue;
            }
            let z = self.stacking_z(node);
            if best.map_or(true, |(best_z, _)| z >= best_z) {
                best = Some((z, node));
            }
        }
        best.map(|(_, node)| node)
    }

    fn text_transform(&self, node: NodeId) -> TextTransform {
        std::iter::once(node)
            .chain(self.ancestors(node))
            .find_map(|n| self.element(n).and_then(|e| e.style.text_transform))
            .unwrap_or(TextTransform::None)
    }

    /// Rendered text of the subtree, skipping undisplayed nodes and applying text-transform.
    pub fn inner_text(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => {
                let transform = self
                    .parent(node)
                    .map(|p| self.text_transform(p))
                    .unwrap_or(TextTransform::None);
                out.push_str(&transform.apply(text));
            }
            NodeKind::Element(element) => {
                if element.style.display == Display::None {
                    return;
                }
                for child in &self.nodes[node.0].children {
                    self.collect_text(*child, out);
                }
            }
            NodeKind::Document => {
                for child in &self.nodes[node.0].children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    pub fn set_hovered(&mut self, node: Option<NodeId>) {
        self.hovered = node;
    }

    /// Blurs the previous focus owner, then focuses `node`.
    pub fn focus(&mut self, node: NodeId) {
        if self.focused == Some(node) {
            return;
        }
        if let Some(previous) = self.focused.take() {
            self.dispatch(previous, "blur", false);
        }
        self.focused = Some(node);
        self.dispatch(node, "focus", false);
    }

    pub fn blur(&mut self) {
        if let Some(previous) = self.focused.take() {
            self.dispatch(previous, "blur", false);
        }
    }

    pub fn add_listener(&mut self, node: NodeId, kind: &'static str, handler: ListenerFn) {
        self.listeners.push(Listener {
            node,
            kind,
            handler,
        });
    }

    /// Records the event and runs listeners on the target, then on ancestors when it bubbles.
    pub fn dispatch(&mut self, target: NodeId, kind: &'static str, synthetic: bool) {
        let event = DomEvent {
            target,
            kind,
            synthetic,
        };
        trace!(?target, kind, synthetic, "dispatch");
        self.events.push(event.clone());

        let path: Vec<NodeId> = if bubbles(kind) {
            std::iter::once(target).chain(self.ancestors(target)).collect()
        } else {
            vec![target]
        };
        let handlers: Vec<ListenerFn> = path
            .iter()
            .flat_map(|node| {
                self.listeners
                    .iter()
                    .filter(move |l| l.node == *node && l.kind == kind)
                    .map(|l| l.handler.clone())
            })
            .collect();
        for handler in handlers {
            handler(self, &event);
        }
    }

    /// Native activation: fires `click` and runs the default action.
    pub fn activate(&mut self, node: NodeId) {
        self.dispatch(node, "click", false);
        let default_action = self.element(node).map(|element| {
            (
                element.tag.clone(),
                element.input_type().to_string(),
                element.attr("href").map(str::to_string),
            )
        });
        match default_action {
            Some((tag, kind, _)) if tag == "input" && kind == "checkbox" => {
                if let Some(element) = self.element_mut(node) {
                    element.checked = !element.checked;
                }
                self.dispatch(node, "change", false);
            }
            Some((tag, kind, _)) if tag == "input" && kind == "radio" => {
                if let Some(element) = self.element_mut(node) {
                    element.checked = true;
                }
                self.dispatch(node, "change", false);
            }
            Some((tag, _, Some(href))) if tag == "a" => {
                let target = self.resolve_url(&href);
                self.request_navigation(Navigation::To(target));
            }
            _ => {}
        }
    }

    pub fn events(&self) -> &[DomEvent] {
        &self.events
    }

    /// Event names dispatched at `node`, in order.
    pub fn events_for(&self, node: NodeId) -> Vec<&'static str> {
        self.events
            .iter()
            .filter(|e| e.target == node)
            .map(|e| e.kind)
            .collect()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn log(&mut self, level: &str, message: &str) {
        self.console.push(ConsoleLine {
            level: level.to_string(),
            message: message.to_string(),
        });
    }

    pub fn request_navigation(&mut self, navigation: Navigation) {
        self.navigation = Some(navigation);
    }

    pub fn pending_navigation(&self) -> Option<&Navigation> {
        self.navigation.as_ref()
    }

    pub fn take_navigation(&mut self) -> Option<Navigation> {
        self.navigation.take()
    }

    /// Resolves `href` against the current location.
    pub fn resolve_url(&self, href: &str) -> String {
        if href.contains("://") {
            return href.to_string();
        }
        let origin_end = self
            .location
            .find("://")
            .and_then(|scheme| {
                self.location[scheme + 3..]
                    .find('/')
                    .map(|slash| scheme + 3 + slash)
            })
            .unwrap_or(self.location.len());
        if let Some(path) = href.strip_prefix('/') {
            format!("{}/{}", &self.location[..origin_end], path)
        } else {
            let base = self.location.rfind('/').filter(|idx| *idx >= origin_end);
            match base {
                Some(idx) => format!("{}/{}", &self.location[..idx], href),
                None => format!("{}/{}", &self.location[..origin_end], href),
            }
        }
    }

    /// Carries tab-scoped state (session storage, cookies, local storage) into a fresh page.
    pub fn inherit_tab_state(&mut self, previous: &Document) {
        self.storage.session = previous.storage.session.clone();
        self.storage.cookies = previous.storage.cookies.clone();
        self.storage.local = previous.storage.local.clone();
        self.storage.indexed_db = previous.storage.indexed_db.clone();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn flow_layout_stacks_children() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let first = doc.append_element(body, "p", &[]);
        doc.append_text(first, "one");
        let second = doc.append_element(body, "p", &[]);
        doc.append_text(second, "two");

        assert_eq!(doc.rect(first), Rect::new(0.0, 0.0, 1024.0, 20.0));
        assert_eq!(doc.rect(second), Rect::new(0.0, 20.0, 1024.0, 20.0));
    }

    #[test]
    fn hidden_subtrees_collapse() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let hidden = doc.append_element(body, "div", &[]);
        let inner = doc.append_element(hidden, "span", &[]);
        doc.append_text(inner, "secret");
        doc.set_style(hidden, |s| s.display = Display::None);

        assert!(!doc.is_rendered(inner));
        assert_eq!(doc.rect(inner).width, 0.0);
        assert_eq!(doc.inner_text(body), "");
    }

    #[test]
    fn hit_test_prefers_higher_z_then_later_nodes() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let button = doc.append_element(body, "button", &[]);
        let overlay = doc.append_element(body, "div", &[("class", "modal")]);
        doc.place(overlay, Rect::new(0.0, 0.0, 200.0, 200.0));

        assert_eq!(doc.element_at(10.0, 10.0), Some(overlay));
        doc.set_style(overlay, |s| s.z_index = Some(-1));
        assert_eq!(doc.element_at(10.0, 10.0), Some(button));
        doc.set_style(overlay, |s| {
            s.z_index = Some(5);
            s.pointer_events = false;
        });
        assert_eq!(doc.element_at(10.0, 10.0), Some(button));
        assert_eq!(doc.element_at(5000.0, 10.0), None);
    }

    #[test]
    fn inner_text_applies_inherited_transform() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let nav = doc.append_element(body, "nav", &[]);
        let link = doc.append_element(nav, "a", &[]);
        doc.append_text(link, "home page");
        doc.set_style(nav, |s| s.text_transform = Some(TextTransform::Capitalize));

        assert_eq!(doc.inner_text(link), "Home Page");
    }

    #[test]
    fn focus_blurs_previous_owner() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let a = doc.append_element(body, "input", &[]);
        let b = doc.append_element(body, "input", &[]);
        doc.focus(a);
        doc.focus(b);

        assert_eq!(doc.events_for(a), vec!["focus", "blur"]);
        assert_eq!(doc.events_for(b), vec!["focus"]);
        assert_eq!(doc.focused(), Some(b));
    }

    #[test]
    fn listeners_bubble_and_can_mutate() {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let form = doc.append_element(body, "form", &[]);
        let button = doc.append_element(form, "button", &[]);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        doc.add_listener(
            form,
            "click",
            Arc::new(move |doc: &mut Document, _ev: &DomEvent| {
                seen.fetch_add(1, Ordering::SeqCst);
                doc.title = "clicked".into();
            }),
        );
        doc.activate(button);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(doc.title, "clicked");
    }

    #[test]
    fn anchors_request_navigation() {
        let mut doc = Document::new("http://localhost:8080/app/index.html");
        let body = doc.body();
        let link = doc.append_element(body, "a", &[("href", "next.html")]);
        doc.activate(link);
        assert_eq!(
            doc.take_navigation(),
            Some(Navigation::To("http://localhost:8080/app/next.html".into()))
        );
        assert_eq!(doc.resolve_url("/root"), "http://localhost:8080/root");
    }
}
