use crossrun_dom::{Document, Element, NodeId, TextTransform};

pub const MASK_GLYPH: char = '\u{2022}';

fn masks_value(element: &Element) -> bool {
    match element.style.text_security.as_deref() {
        Some("none") => false,
        Some(_) => true,
        None => element.input_type() == "password",
    }
}

fn transform_of(doc: &Document, node: NodeId) -> TextTransform {
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .find_map(|n| doc.element(n).and_then(|e| e.style.text_transform))
        .unwrap_or(TextTransform::None)
}

/// The text a user would read for `node`.
///
/// Form controls show their value (masked for secure inputs) or else the
/// placeholder. Other elements concatenate `::before`, rendered text and
/// `::after`.
pub fn matchable_text(doc: &Document, node: NodeId) -> String {
    let Some(element) = doc.element(node) else {
        return doc.inner_text(node);
    };

    if element.is_form_control() {
        let value = element.value.clone().unwrap_or_default();
        if value.is_empty() {
            return element.attr("placeholder").unwrap_or_default().to_string();
        }
        if masks_value(element) {
            return std::iter::repeat(MASK_GLYPH)
                .take(value.chars().count())
                .collect();
        }
        return value;
    }

    let transform = transform_of(doc, node);
    let mut out = String::new();
    if let Some(before) = &element.before.content {
        out.push_str(&transform.apply(before));
    }
    out.push_str(&doc.inner_text(node));
    if let Some(after) = &element.after.content {
        out.push_str(&transform.apply(after));
    }
    out
}

fn unwrap_url(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("url(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(|inner| inner.trim().trim_matches(|ch| ch == '"' || ch == '\''))
        .unwrap_or(raw)
}

/// Image URLs drawn by `node`: backgrounds of the box and its pseudo boxes, then `src`.
pub fn image_sources(doc: &Document, node: NodeId) -> Vec<String> {
    let Some(element) = doc.element(node) else {
        return Vec::new();
    };
    let backgrounds = [
        element.style.background_image.as_deref(),
        element.before.background_image.as_deref(),
        element.after.background_image.as_deref(),
    ];
    let mut out: Vec<String> = backgrounds
        .into_iter()
        .flatten()
        .filter(|raw| !raw.trim().is_empty() && raw.trim() != "none")
        .map(|raw| unwrap_url(raw).to_string())
        .collect();
    let draws_src = element.tag == "img" || element.input_type() == "image";
    if let Some(src) = element.attr("src").filter(|_| draws_src) {
        out.push(doc.resolve_url(src));
        out.push(src.to_string());
    }
    out
}
