use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crossrun_core_types::{RelayError, RelayResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument};

use crate::metrics::{self, Stage};

/// Pause between attempts when the caller gives none.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The unqueued function behind a tool.
pub type RawHandle = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, RelayResult<Value>> + Send + Sync>;

/// A tool reference that can be called directly, bypassing the queue.
///
/// Retry loops run inside a queued task, so calling the queued wrapper
/// from there would wait on the drain that is running them.
#[derive(Clone)]
pub struct BoundTool {
    path: String,
    handle: Option<RawHandle>,
}

impl BoundTool {
    pub fn new<F, Fut>(path: impl Into<String>, handle: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        Self {
            path: path.into(),
            handle: Some(Arc::new(move |args| handle(args).boxed())),
        }
    }

    pub fn from_handle(path: impl Into<String>, handle: RawHandle) -> Self {
        Self {
            path: path.into(),
            handle: Some(handle),
        }
    }

    /// A reference with no raw handle; retry loops refuse it.
    pub fn unbound(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            handle: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handle(&self) -> RelayResult<&RawHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| RelayError::InvalidTool(format!("{} is not a bound tool", self.path)))
    }

    pub async fn call(&self, args: Vec<Value>) -> RelayResult<Value> {
        let handle = self.handle()?;
        handle(args).await
    }
}

impl fmt::Debug for BoundTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTool")
            .field("path", &self.path)
            .field("bound", &self.handle.is_some())
            .finish()
    }
}

/// Calls `tool` every `delay` until it succeeds. With a `limit`, gives up
/// with `TimeoutError` once that much time has passed, even mid-attempt.
#[instrument(skip(args), fields(tool = %tool.path()))]
pub async fn until(
    tool: &BoundTool,
    args: Vec<Value>,
    delay: Option<Duration>,
    limit: Option<Duration>,
) -> RelayResult<Value> {
    let handle = tool.handle()?.clone();
    let delay = delay.unwrap_or(DEFAULT_RETRY_DELAY);
    let last_error: Mutex<Option<RelayError>> = Mutex::new(None);

    let attempts = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match handle(args.clone()).await {
                Ok(value) => {
                    debug!(attempt, "until satisfied");
                    return value;
                }
                Err(err) => {
                    *last_error.lock() = Some(err);
                    metrics::record(Stage::Retried);
                    sleep(delay).await;
                }
            }
        }
    };

    match limit {
        None => Ok(attempts.await),
        Some(limit) => match timeout(limit, attempts).await {
            Ok(value) => Ok(value),
            Err(_) => {
                let cause = last_error
                    .lock()
                    .take()
                    .map(|err| format!(": {err}"))
                    .unwrap_or_default();
                Err(RelayError::Timeout(format!(
                    "{} did not succeed within {}ms{cause}",
                    tool.path(),
                    limit.as_millis()
                )))
            }
        },
    }
}

/// Calls `tool` every `delay` for as long as it succeeds, then settles with
/// the last successful result; `null` when the first call already fails.
#[instrument(skip(args), fields(tool = %tool.path()))]
pub async fn while_ok(
    tool: &BoundTool,
    args: Vec<Value>,
    delay: Option<Duration>,
) -> RelayResult<Value> {
    let handle = tool.handle()?.clone();
    let delay = delay.unwrap_or(DEFAULT_RETRY_DELAY);
    let mut last = Value::Null;
    loop {
        match handle(args.clone()).await {
            Ok(value) => {
                last = value;
                metrics::record(Stage::Retried);
                sleep(delay).await;
            }
            Err(err) => {
                debug!(error = %err, "while ended");
                return Ok(last);
            }
        }
    }
}
