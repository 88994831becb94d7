use crossrun_core_types::{RelayError, RelayResult, TextValue};
use regex::{Regex, RegexBuilder};

/// Compiled text predicate for one search value.
#[derive(Clone, Debug)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    /// Patterns are used verbatim. Literal text matches as a case-insensitive
    /// substring, or as the exact whole text when `strict`.
    pub fn build(value: &TextValue, strict: bool) -> RelayResult<Self> {
        let regex = match value {
            TextValue::Pattern(pattern) => {
                let mut builder = RegexBuilder::new(&pattern.source);
                for flag in pattern.flags.chars() {
                    match flag {
                        'i' => {
                            builder.case_insensitive(true);
                        }
                        'm' => {
                            builder.multi_line(true);
                        }
                        's' => {
                            builder.dot_matches_new_line(true);
                        }
                        // global/sticky/unicode have no effect on a single test
                        'g' | 'y' | 'u' => {}
                        other => {
                            return Err(RelayError::InvalidTool(format!(
                                "unsupported pattern flag {other:?}"
                            )))
                        }
                    }
                }
                builder.build()
            }
            literal => {
                let text = normalize(&literal.literal().unwrap_or_default());
                let escaped = regex::escape(&text);
                if strict {
                    Regex::new(&format!("^{escaped}$"))
                } else {
                    RegexBuilder::new(&escaped).case_insensitive(true).build()
                }
            }
        }
        .map_err(|err| RelayError::InvalidTool(format!("invalid pattern: {err}")))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(&normalize(text))
    }
}

/// Collapses runs of whitespace the way rendered text does.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
