//! Client runtime: the page side of a crossrun session.
//!
//! A [`ClientRuntime`] owns the live document, answers `tool`, `exec`,
//! `coverage` and `end` messages, and reconnects with its stored token
//! whenever a navigation replaces the page.

mod context;
mod errors;
pub mod memo;
mod ready;
mod runtime;
mod seams;
mod tools;

pub use context::{ClientContext, ScriptFn, ScriptHost};
pub use errors::{ClientError, ClientResult};
pub use ready::{ReadyPolicy, ReadyWait, DEFAULT_READY_TIMEOUT, READY_POLL};
pub use runtime::{ClientBuilder, ClientRuntime, RunReport};
pub use seams::{
    Connector, HubConnector, PageFn, PageLoader, PageSet, RegistryFetcher, ScriptFetcher,
};
pub use tools::run_tool;
