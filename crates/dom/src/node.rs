use std::collections::BTreeMap;

use crate::style::{Pseudo, Rect, Style};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Clone, Debug)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub style: Style,
    /// Absolutely positioned box; laid out in flow when `None`.
    pub placed: Option<Rect>,
    pub(crate) layout: Rect,
    pub value: Option<String>,
    /// Character offsets `(start, end)` of the current selection.
    pub selection: Option<(usize, usize)>,
    pub checked: bool,
    pub before: Pseudo,
    pub after: Pseudo,
}

impl Element {
    pub(crate) fn new(tag: &str, attrs: &[(&str, &str)]) -> Self {
        let tag = tag.to_ascii_lowercase();
        let attrs: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        let value = if matches!(tag.as_str(), "input" | "textarea" | "select") {
            Some(attrs.get("value").cloned().unwrap_or_default())
        } else {
            None
        };
        let checked = attrs.contains_key("checked");
        Self {
            tag,
            attrs,
            style: Style::visible(),
            placed: None,
            layout: Rect::default(),
            value,
            selection: None,
            checked,
            before: Pseudo::default(),
            after: Pseudo::default(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn input_type(&self) -> &str {
        if self.tag == "input" {
            self.attr("type").unwrap_or("text")
        } else {
            ""
        }
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }

    /// Controls whose value can be edited as text.
    pub fn is_text_editable(&self) -> bool {
        match self.tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                self.input_type(),
                "checkbox"
                    | "radio"
                    | "button"
                    | "submit"
                    | "reset"
                    | "image"
                    | "file"
                    | "hidden"
                    | "range"
                    | "color"
            ),
            _ => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.has_attr("disabled")
    }

    pub fn is_readonly(&self) -> bool {
        self.has_attr("readonly")
    }

    pub fn rect(&self) -> Rect {
        self.layout
    }
}
