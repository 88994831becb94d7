use crate::document::Document;
use crate::errors::{DomError, DomResult};
use crate::node::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SelectorCombinator {
    Descendant,
    Child,
    AdjacentSibling,
    GeneralSibling,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SelectorAttrCondition {
    Exists { name: String },
    Eq { name: String, value: String },
    Includes { name: String, value: String },
    StartsWith { name: String, value: String },
    EndsWith { name: String, value: String },
    Contains { name: String, value: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    tag: Option<String>,
    universal: bool,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<SelectorAttrCondition>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    step: SelectorStep,
    combinator: Option<SelectorCombinator>,
}

/// Parsed selector list (comma separated groups).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    groups: Vec<Vec<SelectorPart>>,
}

impl Selector {
    pub fn parse(selector: &str) -> DomResult<Self> {
        Ok(Self {
            groups: parse_selector_groups(selector)?,
        })
    }
}

impl Document {
    /// Elements under `scope` (exclusive) matching `selector`, in document order.
    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> DomResult<Vec<NodeId>> {
        let parsed = Selector::parse(selector)?;
        Ok(self
            .descendant_elements(scope)
            .into_iter()
            .filter(|node| self.matches(*node, &parsed))
            .collect())
    }

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> DomResult<Option<NodeId>> {
        Ok(self.query_selector_all(scope, selector)?.into_iter().next())
    }

    pub fn matches(&self, node_id: NodeId, selector: &Selector) -> bool {
        selector
            .groups
            .iter()
            .any(|steps| self.matches_selector_chain(node_id, steps))
    }

    fn matches_selector_chain(&self, node_id: NodeId, steps: &[SelectorPart]) -> bool {
        let Some(last) = steps.last() else {
            return false;
        };
        if !self.matches_step(node_id, &last.step) {
            return false;
        }

        let mut current = node_id;
        for idx in (1..steps.len()).rev() {
            let prev_step = &steps[idx - 1].step;
            let combinator = steps[idx]
                .combinator
                .unwrap_or(SelectorCombinator::Descendant);

            let matched = match combinator {
                SelectorCombinator::Child => self
                    .parent(current)
                    .filter(|parent| self.matches_step(*parent, prev_step)),
                SelectorCombinator::Descendant => {
                    let mut cursor = self.parent(current);
                    let mut found = None;
                    while let Some(parent) = cursor {
                        if self.matches_step(parent, prev_step) {
                            found = Some(parent);
                            break;
                        }
                        cursor = self.parent(parent);
                    }
                    found
                }
                SelectorCombinator::AdjacentSibling => self
                    .previous_element_sibling(current)
                    .filter(|sibling| self.matches_step(*sibling, prev_step)),
                SelectorCombinator::GeneralSibling => {
                    let mut cursor = self.previous_element_sibling(current);
                    let mut found = None;
                    while let Some(sibling) = cursor {
                        if self.matches_step(sibling, prev_step) {
                            found = Some(sibling);
                            break;
                        }
                        cursor = self.previous_element_sibling(sibling);
                    }
                    found
                }
            };

            let Some(matched) = matched else {
                return false;
            };
            current = matched;
        }

        true
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };

        if let Some(tag) = &step.tag {
            if !element.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &step.id {
            if element.id() != Some(id.as_str()) {
                return false;
            }
        }
        if !step
            .classes
            .iter()
            .all(|class| element.classes().any(|c| c == class))
        {
            return false;
        }

        step.attrs.iter().all(|cond| match cond {
            SelectorAttrCondition::Exists { name } => element.has_attr(name),
            SelectorAttrCondition::Eq { name, value } => element.attr(name) == Some(value),
            SelectorAttrCondition::Includes { name, value } => element
                .attr(name)
                .is_some_and(|v| v.split_whitespace().any(|word| word == value)),
            SelectorAttrCondition::StartsWith { name, value } => {
                element.attr(name).is_some_and(|v| v.starts_with(value.as_str()))
            }
            SelectorAttrCondition::EndsWith { name, value } => {
                element.attr(name).is_some_and(|v| v.ends_with(value.as_str()))
            }
            SelectorAttrCondition::Contains { name, value } => {
                element.attr(name).is_some_and(|v| v.contains(value.as_str()))
            }
        })
    }
}

fn parse_selector_chain(selector: &str) -> DomResult<Vec<SelectorPart>> {
    let tokens = tokenize_selector(selector)?;
    let mut steps = Vec::new();
    let mut pending_combinator = None;

    for token in tokens {
        let combinator = match token.as_str() {
            ">" => Some(SelectorCombinator::Child),
            "+" => Some(SelectorCombinator::AdjacentSibling),
            "~" => Some(SelectorCombinator::GeneralSibling),
            _ => None,
        };
        if let Some(combinator) = combinator {
            if steps.is_empty() || pending_combinator.is_some() {
                return Err(DomError::UnsupportedSelector(selector.into()));
            }
            pending_combinator = Some(combinator);
            continue;
        }

        let step = parse_selector_step(&token)?;
        let combinator = if steps.is_empty() {
            None
        } else {
            Some(
                pending_combinator
                    .take()
                    .unwrap_or(SelectorCombinator::Descendant),
            )
        };
        steps.push(SelectorPart { step, combinator });
    }

    if steps.is_empty() || pending_combinator.is_some() {
        return Err(DomError::UnsupportedSelector(selector.into()));
    }

    Ok(steps)
}

fn parse_selector_groups(selector: &str) -> DomResult<Vec<Vec<SelectorPart>>> {
    split_selector_groups(selector)?
        .iter()
        .map(|group| parse_selector_chain(group))
        .collect()
}

fn split_selector_groups(selector: &str) -> DomResult<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(DomError::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            ',' if bracket_depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return Err(DomError::UnsupportedSelector(selector.into()));
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(DomError::UnsupportedSelector(selector.into()));
    }

    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err(DomError::UnsupportedSelector(selector.into()));
    }
    groups.push(trimmed.to_string());
    Ok(groups)
}

fn tokenize_selector(selector: &str) -> DomResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(DomError::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            '>' | '+' | '~' if bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
                tokens.push(ch.to_string());
            }
            ch if ch.is_ascii_whitespace() && bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(DomError::UnsupportedSelector(selector.into()));
    }
    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }
    Ok(tokens)
}

fn parse_selector_step(part: &str) -> DomResult<SelectorStep> {
    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if step.universal || step.tag.is_some() {
                    return Err(DomError::UnsupportedSelector(part.into()));
                }
                step.universal = true;
                i += 1;
            }
            b'#' => {
                let Some((id, next)) = parse_selector_ident(part, i + 1) else {
                    return Err(DomError::UnsupportedSelector(part.into()));
                };
                if step.id.replace(id).is_some() {
                    return Err(DomError::UnsupportedSelector(part.into()));
                }
                i = next;
            }
            b'.' => {
                let Some((class_name, next)) = parse_selector_ident(part, i + 1) else {
                    return Err(DomError::UnsupportedSelector(part.into()));
                };
                step.classes.push(class_name);
                i = next;
            }
            b'[' => {
                let (attr, next) = parse_selector_attr_condition(part, i)?;
                step.attrs.push(attr);
                i = next;
            }
            _ => {
                if step.tag.is_some()
                    || step.id.is_some()
                    || !step.classes.is_empty()
                    || !step.attrs.is_empty()
                    || step.universal
                {
                    return Err(DomError::UnsupportedSelector(part.into()));
                }
                let Some((tag, next)) = parse_selector_ident(part, i) else {
                    return Err(DomError::UnsupportedSelector(part.into()));
                };
                step.tag = Some(tag.to_ascii_lowercase());
                i = next;
            }
        }
    }

    Ok(step)
}

fn parse_selector_ident(part: &str, start: usize) -> Option<(String, usize)> {
    let tail = part.get(start..)?;
    let len = tail
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
        .map(|(idx, _)| idx)
        .unwrap_or(tail.len());
    if len == 0 {
        return None;
    }
    Some((tail[..len].to_string(), start + len))
}

fn parse_selector_attr_condition(
    part: &str,
    start: usize,
) -> DomResult<(SelectorAttrCondition, usize)> {
    let unsupported = || DomError::UnsupportedSelector(part.into());
    let tail = part.get(start + 1..).ok_or_else(unsupported)?;
    let close = tail.find(']').ok_or_else(unsupported)?;
    let body = tail[..close].trim();
    let next = start + 1 + close + 1;

    let Some(eq) = body.find('=') else {
        if body.is_empty() {
            return Err(unsupported());
        }
        return Ok((
            SelectorAttrCondition::Exists {
                name: body.to_ascii_lowercase(),
            },
            next,
        ));
    };

    let (lhs, rhs) = body.split_at(eq);
    let value = rhs[1..]
        .trim()
        .trim_matches(|ch| ch == '"' || ch == '\'')
        .to_string();
    let (name, op) = match lhs.chars().last() {
        Some(op @ ('~' | '^' | '$' | '*')) => (&lhs[..lhs.len() - 1], Some(op)),
        _ => (lhs, None),
    };
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(unsupported());
    }

    let cond = match op {
        None => SelectorAttrCondition::Eq { name, value },
        Some('~') => SelectorAttrCondition::Includes { name, value },
        Some('^') => SelectorAttrCondition::StartsWith { name, value },
        Some('$') => SelectorAttrCondition::EndsWith { name, value },
        Some(_) => SelectorAttrCondition::Contains { name, value },
    };
    Ok((cond, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new("http://localhost/");
        let body = doc.body();
        let form = doc.append_element(body, "form", &[("id", "login")]);
        let user = doc.append_element(form, "input", &[("name", "user"), ("class", "field wide")]);
        let submit = doc.append_element(form, "button", &[("type", "submit")]);
        let aside = doc.append_element(body, "aside", &[("data-role", "help-panel")]);
        (doc, user, submit, aside)
    }

    #[test]
    fn matches_tags_ids_and_classes() {
        let (doc, user, submit, _) = sample();
        let root = doc.root();
        assert_eq!(doc.query_selector_all(root, "input.field").unwrap(), vec![user]);
        assert_eq!(doc.query_selector_all(root, "#login > button").unwrap(), vec![submit]);
        assert_eq!(doc.query_selector_all(root, "form *").unwrap(), vec![user, submit]);
        assert!(doc.query_selector_all(root, "body > input").unwrap().is_empty());
    }

    #[test]
    fn matches_attribute_operators_and_groups() {
        let (doc, user, submit, aside) = sample();
        let root = doc.root();
        assert_eq!(doc.query_selector_all(root, "[name=user]").unwrap(), vec![user]);
        assert_eq!(doc.query_selector_all(root, "[class~=wide]").unwrap(), vec![user]);
        assert_eq!(doc.query_selector_all(root, "[data-role^='help']").unwrap(), vec![aside]);
        assert_eq!(
            doc.query_selector_all(root, "button, aside").unwrap(),
            vec![submit, aside]
        );
        assert_eq!(doc.query_selector_all(root, "input + button").unwrap(), vec![submit]);
        assert_eq!(doc.query_selector_all(root, "form ~ aside").unwrap(), vec![aside]);
    }

    #[test]
    fn rejects_unsupported_syntax() {
        let (doc, ..) = sample();
        let root = doc.root();
        assert!(doc.query_selector_all(root, "button:hover").is_err());
        assert!(doc.query_selector_all(root, "a >").is_err());
        assert!(doc.query_selector_all(root, "[name=x").is_err());
        assert!(doc.query_selector_all(root, ",a").is_err());
    }
}
