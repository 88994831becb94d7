use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contained_in(&self, other: &Rect) -> bool {
        self.x >= other.x
            && self.y >= other.y
            && self.right() <= other.right()
            && self.bottom() <= other.bottom()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Display {
    #[default]
    Block,
    None,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextTransform {
    None,
    Uppercase,
    Lowercase,
    Capitalize,
}

impl TextTransform {
    pub fn apply(&self, text: &str) -> String {
        match self {
            TextTransform::None => text.to_string(),
            TextTransform::Uppercase => text.to_uppercase(),
            TextTransform::Lowercase => text.to_lowercase(),
            TextTransform::Capitalize => {
                let mut out = String::with_capacity(text.len());
                let mut at_word_start = true;
                for ch in text.chars() {
                    if at_word_start && ch.is_alphanumeric() {
                        out.extend(ch.to_uppercase());
                        at_word_start = false;
                    } else {
                        if ch.is_whitespace() {
                            at_word_start = true;
                        }
                        out.push(ch);
                    }
                }
                out
            }
        }
    }
}

/// Computed style subset the query and action engines consult.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Style {
    pub display: Display,
    pub visibility: Visibility,
    /// Inherited when `None`.
    pub text_transform: Option<TextTransform>,
    pub background_image: Option<String>,
    /// `-webkit-text-security`; masking applies unless this is `"none"`.
    pub text_security: Option<String>,
    pub z_index: Option<i32>,
    pub pointer_events: bool,
}

impl Style {
    pub fn visible() -> Self {
        Self {
            pointer_events: true,
            ..Self::default()
        }
    }
}

/// `::before` / `::after` generated box.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pseudo {
    pub content: Option<String>,
    pub background_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_only_touches_word_starts() {
        assert_eq!(
            TextTransform::Capitalize.apply("sign in now"),
            "Sign In Now"
        );
        assert_eq!(TextTransform::Uppercase.apply("ok"), "OK");
    }

    #[test]
    fn rect_geometry() {
        let viewport = Rect::new(0.0, 0.0, 100.0, 100.0);
        let inside = Rect::new(10.0, 10.0, 20.0, 20.0);
        let straddling = Rect::new(90.0, 90.0, 20.0, 20.0);
        assert!(inside.contained_in(&viewport));
        assert!(straddling.intersects(&viewport));
        assert!(!straddling.contained_in(&viewport));
        assert_eq!(inside.center(), (20.0, 20.0));
        assert!(!inside.contains_point(30.0, 15.0));
    }
}
