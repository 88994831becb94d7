//! DOM query engine: resolves Things against a document.

mod api;
mod judges;
mod matcher;
mod model;
mod text;

pub use api::{describe_all, find, resolve, target_document};
pub use judges::{displayed, reach, reachable, visible};
pub use matcher::{normalize, Matcher};
pub use model::{describe, Resolved, Strictness};
pub use text::{image_sources, matchable_text, MASK_GLYPH};
