//! The tool API a test body calls.
//!
//! Every wrapper queues its call instead of running it and hands back a
//! [`Queued`] handle; [`Context::now`] drains the queue, so calls made one
//! after another without awaiting still reach the browser in call order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crossrun_catalog::{Catalog, CommandId};
use crossrun_core_types::{
    Deferred, Flaws, RelayResult, SessionToken, Thing, ThingArg,
};
use crossrun_scheduler::{BoundTool, CommandQueue, Queued};
use crossrun_transport::SessionHub;
use serde_json::{json, Value};
use tracing::debug;

/// A tool argument. Things may still be pending when the call is queued.
#[derive(Debug)]
pub enum Arg {
    Value(Value),
    Thing(ThingArg),
}

impl Arg {
    async fn resolve(self) -> RelayResult<Value> {
        match self {
            Arg::Value(value) => Ok(value),
            Arg::Thing(thing) => Ok(thing.resolve().await?.to_json()),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Value(Value::from(text))
    }
}

impl From<Thing> for Arg {
    fn from(thing: Thing) -> Self {
        Arg::Thing(thing.into())
    }
}

impl From<Deferred> for Arg {
    fn from(deferred: Deferred) -> Self {
        Arg::Thing(deferred.into())
    }
}

impl From<ThingArg> for Arg {
    fn from(thing: ThingArg) -> Self {
        Arg::Thing(thing)
    }
}

/// One test body's view of its session.
#[derive(Clone)]
pub struct Context {
    token: SessionToken,
    hub: Arc<SessionHub>,
    catalog: Arc<Catalog>,
    queue: Arc<CommandQueue>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("token", &self.token)
            .field("queue", &self.queue)
            .finish()
    }
}

impl Context {
    pub fn new(
        hub: Arc<SessionHub>,
        catalog: Arc<Catalog>,
        token: SessionToken,
        slow: Duration,
    ) -> Self {
        Self {
            token,
            hub,
            catalog,
            queue: Arc::new(CommandQueue::new(slow)),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Capability gaps the client reported on connect.
    pub fn flaws(&self) -> Flaws {
        self.hub
            .session(&self.token)
            .map(|info| info.flaws)
            .unwrap_or_default()
    }

    /// Queues the tool at `path`.
    pub fn tool(&self, path: &str, args: Vec<Arg>) -> Queued {
        let catalog = self.catalog.clone();
        let token = self.token.clone();
        let target = path.to_string();
        self.queue.push(path, move || async move {
            let mut resolved = Vec::with_capacity(args.len());
            for arg in args {
                resolved.push(arg.resolve().await?);
            }
            debug!(token = %token, tool = %target, "running queued tool");
            catalog.invoke(&token, &target, resolved).await
        })
    }

    /// Runs everything queued so far; settles with the last result.
    pub fn now(&self) -> impl Future<Output = RelayResult<Value>> + Send + 'static {
        self.queue.drain()
    }

    /// A direct reference for [`Context::until`] and [`Context::while_ok`].
    pub fn bind(&self, path: &str) -> RelayResult<BoundTool> {
        self.catalog.bind(&self.token, path)
    }

    pub fn click(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::InputClick, vec![thing.into()])
    }

    pub fn dblclick(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::InputDblclick, vec![thing.into()])
    }

    pub fn hover(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::InputHover, vec![thing.into()])
    }

    /// Types into `target`, or into the focused element when there is none.
    pub fn type_text(&self, text: &str, target: Option<Arg>) -> Queued {
        let mut args = vec![Arg::from(text)];
        args.extend(target);
        self.command(CommandId::InputType, args)
    }

    pub fn paste(&self, text: &str, target: Option<Arg>) -> Queued {
        let mut args = vec![Arg::from(text)];
        args.extend(target);
        self.command(CommandId::InputPaste, args)
    }

    /// Empties `target` (or the focused element) key by key, or in one
    /// step when `atomic` is set.
    pub fn clear(&self, target: Option<Arg>, atomic: bool) -> Queued {
        let target = target.unwrap_or_else(|| Arg::from(Value::Null));
        self.command(CommandId::InputClear, vec![target, Arg::from(Value::Bool(atomic))])
    }

    pub fn find(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::QueryFind, vec![thing.into()])
    }

    pub fn is(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::QueryIs, vec![thing.into()])
    }

    pub fn not(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::QueryNot, vec![thing.into()])
    }

    pub fn value(&self, thing: impl Into<Arg>) -> Queued {
        self.command(CommandId::QueryValue, vec![thing.into()])
    }

    pub fn navigate(&self, url: &str) -> Queued {
        self.command(CommandId::ClientNavigate, vec![Arg::from(url)])
    }

    pub fn reload(&self) -> Queued {
        self.command(CommandId::ClientReload, vec![])
    }

    /// `null` resets in place, `true` reloads, a url navigates.
    pub fn reset(&self, mode: Value) -> Queued {
        self.command(CommandId::ClientReset, vec![Arg::Value(mode)])
    }

    /// Installs a ready policy, e.g. `{"type": "document"}`.
    pub fn ready(&self, policy: Value) -> Queued {
        self.command(CommandId::HooksReady, vec![Arg::Value(policy)])
    }

    pub fn delay(&self, pause: Duration) -> Queued {
        self.command(
            CommandId::RunnerDelay,
            vec![Arg::Value(json!(pause.as_millis() as u64))],
        )
    }

    pub fn until(
        &self,
        path: &str,
        args: Vec<Value>,
        delay: Option<Duration>,
        limit: Option<Duration>,
    ) -> Queued {
        self.command(
            CommandId::RunnerUntil,
            vec![
                Arg::from(path),
                Arg::Value(Value::Array(args)),
                Arg::Value(millis(delay)),
                Arg::Value(millis(limit)),
            ],
        )
    }

    pub fn while_ok(&self, path: &str, args: Vec<Value>, delay: Option<Duration>) -> Queued {
        self.command(
            CommandId::RunnerWhile,
            vec![
                Arg::from(path),
                Arg::Value(Value::Array(args)),
                Arg::Value(millis(delay)),
            ],
        )
    }

    /// Queues a host script on the client. Persistent scripts run again on
    /// every page the session reaches afterwards.
    pub fn exec(&self, source: &str, args: Vec<Value>, persistent: bool) -> Queued {
        let hub = self.hub.clone();
        let token = self.token.clone();
        let source = source.to_string();
        self.queue.push(format!("exec {source}"), move || async move {
            hub.exec(&token, source, args, persistent).await
        })
    }

    /// Prints on the client console. Not queued.
    pub fn log(&self, level: &str, message: &str) -> RelayResult<()> {
        self.hub.log(&self.token, level, message)
    }

    fn command(&self, id: CommandId, args: Vec<Arg>) -> Queued {
        self.tool(id.path(), args)
    }
}

fn millis(pause: Option<Duration>) -> Value {
    pause
        .map(|pause| json!(pause.as_millis() as u64))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crossrun_catalog::{RemoteInvoker, ToolCall};
    use crossrun_core_types::{RelayError, ThingKind};
    use crossrun_transport::HubConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ToolCall>>);

    #[async_trait]
    impl RemoteInvoker for Recorder {
        async fn invoke(&self, call: ToolCall) -> RelayResult<Value> {
            let path = call.path.clone();
            self.0.lock().push(call);
            if path == "query.not" {
                Err(RelayError::Precondition("found".into()))
            } else {
                Ok(Value::from(path))
            }
        }
    }

    fn context(recorder: Arc<Recorder>) -> Context {
        Context::new(
            SessionHub::new(HubConfig::default()),
            Catalog::build(recorder),
            "a1b2".parse().unwrap(),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn wrappers_queue_until_now() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone());
        let click = ctx.click(Thing::text("Submit"));
        let typed = ctx.type_text("hello", Some(Thing::node("input").into()));
        assert!(recorder.0.lock().is_empty());

        assert_eq!(ctx.now().await.unwrap(), Value::from("input.type"));
        assert_eq!(click.await.unwrap(), Value::from("input.click"));
        assert_eq!(typed.await.unwrap(), Value::from("input.type"));

        let calls = recorder.0.lock();
        assert_eq!(calls[0].args, vec![json!({"type": "text", "value": "Submit"})]);
        assert_eq!(
            calls[1].args,
            vec![json!("hello"), json!({"type": "node", "value": "input"})]
        );
    }

    #[tokio::test]
    async fn navigation_tools_wait_for_reconnect() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone());
        let _nav = ctx.navigate("/next");
        let _find = ctx.find(Thing::text("Next"));
        ctx.now().await.unwrap();
        let calls = recorder.0.lock();
        assert!(calls[0].wait_reconnect);
        assert!(!calls[1].wait_reconnect);
    }

    #[tokio::test]
    async fn pending_things_settle_before_the_call() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone());
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let pending = Deferred::new(ThingKind::Text, async move {
            rx.await
                .map(Value::from)
                .map_err(|_| RelayError::Aborted("sender dropped".into()))
        });
        let _click = ctx.click(pending);
        let drained = tokio::spawn(ctx.now());
        tx.send("Later".into()).unwrap();
        drained.await.unwrap().unwrap();
        assert_eq!(
            recorder.0.lock()[0].args,
            vec![json!({"type": "text", "value": "Later"})]
        );
    }

    #[tokio::test]
    async fn a_failure_aborts_the_rest_of_the_drain() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone());
        let first = ctx.not(Thing::text("Cancel"));
        let second = ctx.click(Thing::text("Submit"));

        let err = ctx.now().await.unwrap_err();
        assert_eq!(err.name(), "PreconditionError");
        assert_eq!(first.await.unwrap_err().name(), "PreconditionError");
        assert_eq!(second.await.unwrap_err().name(), "AbortError");
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn until_retries_through_the_bound_tool() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone());
        let out = ctx.until(
            "query.find",
            vec![json!("Done")],
            Some(Duration::from_millis(50)),
            Some(Duration::from_millis(500)),
        );
        ctx.now().await.unwrap();
        assert_eq!(out.await.unwrap(), Value::from("query.find"));
        assert!(ctx.bind("query.find").is_ok());
        assert_eq!(ctx.bind("query.nope").unwrap_err().name(), "NotFoundError");
    }
}
