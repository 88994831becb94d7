//! Ordered execution for test bodies.
//!
//! Tool wrappers push deferred calls onto a [`CommandQueue`] and hand back
//! a [`Queued`] handle; draining the queue runs them one after another in
//! call order. [`until`] and [`while_ok`] retry a [`BoundTool`] directly.

pub mod metrics;
mod queue;
mod retry;

pub use queue::{CommandQueue, Queued};
pub use retry::{until, while_ok, BoundTool, RawHandle, DEFAULT_RETRY_DELAY};
