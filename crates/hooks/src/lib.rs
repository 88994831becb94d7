//! Before/after interceptors around tool calls.
//!
//! A call to `space.name` runs `before.tool`, `before.space` and
//! `before.space.name`, then the tool, then the after keys in reverse.
//! Each hook receives the running result and returns the next one.

mod key;
mod registry;

pub use key::{HookKey, Stage};
pub use registry::{Hook, HookFn, HookInput, HookRegistry};
