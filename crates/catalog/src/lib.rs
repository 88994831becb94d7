//! Command catalog: the single mapping from dotted tool paths to handlers.
//!
//! Runner commands (`runner.delay`, `runner.until`, `runner.while`) run on
//! the server. Everything else is a remote stub that forwards the call
//! through a [`RemoteInvoker`].

mod catalog;
mod command;

pub use catalog::{Catalog, Handler, LocalFn, RemoteInvoker, ToolCall};
pub use command::{CommandId, Namespace};
