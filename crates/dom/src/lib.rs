//! Client-side document model.
//!
//! A node arena with the window state around it: a block layout used for
//! hit testing, computed style, storage, the event journal, and a CSS
//! selector engine.

mod document;
mod errors;
mod events;
mod node;
mod selector;
mod style;

use std::sync::Arc;

use parking_lot::Mutex;

pub use document::{Capabilities, Document, ReadyState, Storage};
pub use errors::{DomError, DomResult};
pub use events::{ConsoleLine, DomEvent, ListenerFn, Navigation};
pub use node::{Element, NodeId, NodeKind};
pub use selector::Selector;
pub use style::{Display, Pseudo, Rect, Style, TextTransform, Visibility};

/// The live page shared between the runtime and the engines.
pub type SharedDocument = Arc<Mutex<Document>>;

pub fn shared(doc: Document) -> SharedDocument {
    Arc::new(Mutex::new(doc))
}
