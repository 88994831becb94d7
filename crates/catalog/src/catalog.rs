use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossrun_core_types::{RelayError, RelayResult, SessionToken, ToolPath};
use crossrun_scheduler::{until, while_ok, BoundTool};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::command::CommandId;

/// One remote tool invocation, as the transport sends it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub token: SessionToken,
    pub path: String,
    pub args: Vec<Value>,
    /// The answer may only arrive after the client reconnects.
    pub wait_reconnect: bool,
}

/// Capability the catalog forwards remote tools through.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(&self, call: ToolCall) -> RelayResult<Value>;
}

pub type LocalFn = Arc<
    dyn Fn(Arc<Catalog>, SessionToken, Vec<Value>) -> BoxFuture<'static, RelayResult<Value>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub enum Handler {
    Local(LocalFn),
    Remote { wait_reconnect: bool },
}

impl Handler {
    pub fn local<F, Fut>(run: F) -> Self
    where
        F: Fn(Arc<Catalog>, SessionToken, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = RelayResult<Value>> + Send + 'static,
    {
        Handler::Local(Arc::new(move |catalog, token, args| {
            run(catalog, token, args).boxed()
        }))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Local(_) => f.write_str("Local"),
            Handler::Remote { wait_reconnect } => f
                .debug_struct("Remote")
                .field("wait_reconnect", wait_reconnect)
                .finish(),
        }
    }
}

/// Tool paths and their handlers. Built once per server and shared.
pub struct Catalog {
    invoker: Arc<dyn RemoteInvoker>,
    handlers: RwLock<BTreeMap<String, Handler>>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("handlers", &*self.handlers.read())
            .finish()
    }
}

impl Catalog {
    /// A catalog with every [`CommandId`] registered: runner commands run
    /// locally, the rest are forwarded through `invoker`.
    pub fn build(invoker: Arc<dyn RemoteInvoker>) -> Arc<Self> {
        let catalog = Self {
            invoker,
            handlers: RwLock::new(BTreeMap::new()),
        };
        for id in CommandId::ALL {
            let handler = match id {
                CommandId::RunnerDelay => Handler::local(runner_delay),
                CommandId::RunnerUntil => Handler::local(runner_until),
                CommandId::RunnerWhile => Handler::local(runner_while),
                remote => Handler::Remote {
                    wait_reconnect: remote.waits_for_reconnect(),
                },
            };
            catalog.handlers.write().insert(id.path().to_string(), handler);
        }
        Arc::new(catalog)
    }

    /// Installs `handler` at `path`; without one, a remote stub that waits
    /// for reconnect when `path` is a navigation command.
    pub fn register(&self, path: &str, handler: Option<Handler>) -> RelayResult<()> {
        let parsed: ToolPath = path.parse()?;
        let handler = handler.unwrap_or_else(|| Handler::Remote {
            wait_reconnect: path
                .parse::<CommandId>()
                .map(|id| id.waits_for_reconnect())
                .unwrap_or(false),
        });
        debug!(tool = %parsed, ?handler, "tool registered");
        self.handlers.write().insert(parsed.to_string(), handler);
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> RelayResult<Handler> {
        self.handlers
            .read()
            .get(path.trim())
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("unknown tool {path:?}")))
    }

    pub fn paths(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Runs the tool at `path` for the session `token`. Arguments pass through untouched.
    #[instrument(skip(self, token, args), fields(token = %token))]
    pub async fn invoke(
        self: &Arc<Self>,
        token: &SessionToken,
        path: &str,
        args: Vec<Value>,
    ) -> RelayResult<Value> {
        match self.resolve(path)? {
            Handler::Local(run) => run(self.clone(), token.clone(), args).await,
            Handler::Remote { wait_reconnect } => {
                self.invoker
                    .invoke(ToolCall {
                        token: token.clone(),
                        path: path.trim().to_string(),
                        args,
                        wait_reconnect,
                    })
                    .await
            }
        }
    }

    /// A direct reference to `path` for `token`, usable by retry loops.
    pub fn bind(self: &Arc<Self>, token: &SessionToken, path: &str) -> RelayResult<BoundTool> {
        self.resolve(path)?;
        let catalog = self.clone();
        let token = token.clone();
        let target = path.trim().to_string();
        Ok(BoundTool::new(path.trim(), move |args| {
            let catalog = catalog.clone();
            let token = token.clone();
            let target = target.clone();
            async move { catalog.invoke(&token, &target, args).await }
        }))
    }
}

fn millis_arg(args: &[Value], index: usize) -> RelayResult<Option<Duration>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| RelayError::InvalidTool(format!("expected milliseconds, got {value}"))),
    }
}

/// `[path, args, ...]`: the bound tool and the arguments to retry it with.
fn retry_target(
    catalog: &Arc<Catalog>,
    token: &SessionToken,
    args: &[Value],
) -> RelayResult<(BoundTool, Vec<Value>)> {
    let path = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::InvalidTool("expected a bound tool".into()))?;
    let tool = match path.parse::<CommandId>() {
        Ok(id) if id.is_local() => {
            return Err(RelayError::InvalidTool(format!("{path} cannot be retried")))
        }
        _ => catalog.bind(token, path).map_err(|_| {
            RelayError::InvalidTool(format!("{path} is not a bound tool"))
        })?,
    };
    let tool_args = match args.get(1) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    };
    Ok((tool, tool_args))
}

async fn runner_delay(
    _catalog: Arc<Catalog>,
    _token: SessionToken,
    args: Vec<Value>,
) -> RelayResult<Value> {
    if let Some(pause) = millis_arg(&args, 0)? {
        tokio::time::sleep(pause).await;
    }
    Ok(Value::Null)
}

async fn runner_until(
    catalog: Arc<Catalog>,
    token: SessionToken,
    args: Vec<Value>,
) -> RelayResult<Value> {
    let (tool, tool_args) = retry_target(&catalog, &token, &args)?;
    until(&tool, tool_args, millis_arg(&args, 2)?, millis_arg(&args, 3)?).await
}

async fn runner_while(
    catalog: Arc<Catalog>,
    token: SessionToken,
    args: Vec<Value>,
) -> RelayResult<Value> {
    let (tool, tool_args) = retry_target(&catalog, &token, &args)?;
    while_ok(&tool, tool_args, millis_arg(&args, 2)?).await
}
