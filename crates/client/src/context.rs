use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossrun_actions::ActionEngine;
use crossrun_core_types::{RelayResult, SessionToken};
use crossrun_dom::SharedDocument;
use crossrun_hooks::HookRegistry;
use crossrun_transport::{Frame, LogPayload, MessageKind};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::seams::{PageLoader, ScriptFetcher};

pub type ScriptFn =
    Arc<dyn Fn(ClientContext, Vec<Value>) -> BoxFuture<'static, RelayResult<Value>> + Send + Sync>;

/// Scripts the page can run, by name. An exec body's `source` names one.
#[derive(Clone, Default)]
pub struct ScriptHost {
    scripts: HashMap<String, ScriptFn>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(ClientContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        self.scripts
            .insert(name.into(), Arc::new(move |ctx, args| run(ctx, args).boxed()));
        self
    }

    pub fn get(&self, source: &str) -> RelayResult<ScriptFn> {
        self.scripts
            .get(source.trim())
            .cloned()
            .ok_or_else(|| ClientError::UnknownScript(source.trim().to_string()).into())
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.scripts.keys()).finish()
    }
}

struct Shared {
    doc: SharedDocument,
    actions: ActionEngine,
    hooks: HookRegistry<ClientContext>,
    scripts: ScriptHost,
    fetcher: Arc<dyn ScriptFetcher>,
    loader: Arc<dyn PageLoader>,
    coverage: Mutex<Map<String, Value>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

/// Everything a tool, hook or script can reach on the client.
///
/// Cheap to clone. The document handle stays the same across navigations;
/// its contents are swapped for the new page.
#[derive(Clone)]
pub struct ClientContext {
    shared: Arc<Shared>,
}

impl ClientContext {
    pub(crate) fn new(
        doc: SharedDocument,
        actions: ActionEngine,
        scripts: ScriptHost,
        fetcher: Arc<dyn ScriptFetcher>,
        loader: Arc<dyn PageLoader>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                doc,
                actions,
                hooks: HookRegistry::new(),
                scripts,
                fetcher,
                loader,
                coverage: Mutex::new(Map::new()),
                outbound: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn doc(&self) -> &SharedDocument {
        &self.shared.doc
    }

    pub fn actions(&self) -> &ActionEngine {
        &self.shared.actions
    }

    pub fn hooks(&self) -> &HookRegistry<ClientContext> {
        &self.shared.hooks
    }

    pub fn scripts(&self) -> &ScriptHost {
        &self.shared.scripts
    }

    pub fn fetcher(&self) -> &Arc<dyn ScriptFetcher> {
        &self.shared.fetcher
    }

    pub fn loader(&self) -> &Arc<dyn PageLoader> {
        &self.shared.loader
    }

    pub fn token(&self) -> Option<SessionToken> {
        crate::memo::Memo::read(&self.shared.doc.lock()).token
    }

    /// Runs the named host script.
    pub async fn run_script(&self, source: &str, args: Vec<Value>) -> RelayResult<Value> {
        let script = self.shared.scripts.get(source)?;
        debug!(script = source, "running script");
        script(self.clone(), args).await
    }

    /// Bumps one counter in the coverage map.
    pub fn record_coverage(&self, file: &str, counter: &str) {
        let mut coverage = self.shared.coverage.lock();
        let counters = coverage
            .entry(file.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(counters) = counters {
            let hits = counters.get(counter).and_then(Value::as_u64).unwrap_or(0);
            counters.insert(counter.to_string(), Value::from(hits + 1));
        }
    }

    pub fn coverage(&self) -> Value {
        Value::Object(self.shared.coverage.lock().clone())
    }

    /// Writes to the page console and forwards the line to the server.
    pub fn log(&self, level: &str, message: &str) {
        self.shared.doc.lock().log(level, message);
        let Some(tx) = self.shared.outbound.lock().clone() else {
            return;
        };
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = LogPayload {
            level: level.to_string(),
            message: message.to_string(),
        };
        match Frame::message(id, MessageKind::Log, payload) {
            Ok(frame) => {
                let _ = tx.send(frame.encode());
            }
            Err(err) => warn!(error = %err, "could not encode log line"),
        }
    }

    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.shared.outbound.lock() = Some(tx);
    }

    pub(crate) fn detach(&self) {
        self.shared.outbound.lock().take();
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("doc", &self.shared.doc)
            .field("hooks", &self.shared.hooks.len())
            .field("scripts", &self.shared.scripts)
            .finish()
    }
}
