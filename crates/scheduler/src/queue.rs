use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crossrun_core_types::{RelayError, RelayResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::metrics::{self, Stage};

type Task = Box<dyn FnOnce() -> BoxFuture<'static, RelayResult<Value>> + Send>;

struct Entry {
    label: String,
    task: Task,
    reply: Option<oneshot::Sender<RelayResult<Value>>>,
}

/// Deferred calls run strictly in push order, one drain at a time.
///
/// `drain` takes whatever is queued at the moment it is called; anything
/// pushed afterwards, including from inside a running task, waits for the
/// next drain.
pub struct CommandQueue {
    pending: Mutex<Vec<Entry>>,
    slow: Duration,
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .field("slow", &self.slow)
            .finish()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl CommandQueue {
    /// `slow` is the pause inserted before every pushed task; zero disables it.
    pub fn new(slow: Duration) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            slow,
        }
    }

    pub fn slow(&self) -> Duration {
        self.slow
    }

    /// Queued entries, slow pauses included.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Appends a task and returns a handle that settles once it has run.
    pub fn push<F, Fut>(&self, label: impl Into<String>, task: F) -> Queued
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        if !self.slow.is_zero() {
            let pause = self.slow;
            pending.push(Entry {
                label: format!("slow {}ms", pause.as_millis()),
                task: Box::new(move || {
                    async move {
                        tokio::time::sleep(pause).await;
                        Ok(Value::Null)
                    }
                    .boxed()
                }),
                reply: None,
            });
        }
        pending.push(Entry {
            label: label.clone(),
            task: Box::new(move || task().boxed()),
            reply: Some(tx),
        });
        metrics::record(Stage::Enqueued);
        debug!(task = %label, queued = pending.len(), "task queued");
        Queued { label, rx }
    }

    /// Runs everything queued right now, in order, and settles with the
    /// last task's result.
    ///
    /// A failing task rejects its own handle and the drain; the tasks after
    /// it in the same drain are not run and reject with `AbortError`.
    pub fn drain(&self) -> impl Future<Output = RelayResult<Value>> + Send + 'static {
        let batch = std::mem::take(&mut *self.pending.lock());
        async move {
            let mut last = Value::Null;
            let mut entries = batch.into_iter();
            while let Some(entry) = entries.next() {
                metrics::record(Stage::Started);
                let outcome = (entry.task)().await;
                match outcome {
                    Ok(value) => {
                        metrics::record(Stage::Completed);
                        last = value.clone();
                        if let Some(reply) = entry.reply {
                            let _ = reply.send(Ok(value));
                        }
                    }
                    Err(err) => {
                        metrics::record(Stage::Failed);
                        warn!(task = %entry.label, error = %err, "queued task failed");
                        if let Some(reply) = entry.reply {
                            let _ = reply.send(Err(err.clone()));
                        }
                        for skipped in entries {
                            metrics::record(Stage::Aborted);
                            if let Some(reply) = skipped.reply {
                                let _ = reply.send(Err(RelayError::Aborted(format!(
                                    "{} skipped after {} failed",
                                    skipped.label, entry.label
                                ))));
                            }
                        }
                        return Err(err);
                    }
                }
            }
            Ok(last)
        }
    }
}

/// Handle to a pushed task. Resolves with the task's own outcome.
#[derive(Debug)]
pub struct Queued {
    label: String,
    rx: oneshot::Receiver<RelayResult<Value>>,
}

impl Queued {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Future for Queued {
    type Output = RelayResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RelayError::Aborted(format!(
                "{} was dropped before it ran",
                self.label
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}
