//! Wait-until-ready policies, layered onto navigation as after-hooks.

use std::time::Duration;

use crossrun_core_types::{RelayError, RelayResult, Thing};
use crossrun_dom::ReadyState;
use crossrun_hooks::{Hook, HookKey, HookRegistry};
use crossrun_perceiver::{resolve, Strictness};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::context::ClientContext;

pub const READY_POLL: Duration = Duration::from_millis(50);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(5000);

const NAVIGATION_KEYS: [&str; 3] = [
    "after.client.navigate",
    "after.client.reload",
    "after.client.reset",
];
const CLICK_KEY: &str = "after.input.click";

#[derive(Clone, Debug, PartialEq)]
pub enum ReadyWait {
    Delay(Duration),
    /// Until `readyState` is `complete`.
    Document { timeout: Duration },
    /// Until the thing resolves.
    Thing { thing: Thing, timeout: Duration },
    /// Runs a host script and waits for it.
    Exec { source: String, args: Vec<Value> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReadyPolicy {
    pub wait: ReadyWait,
    /// Also wait after clicks, which may navigate.
    pub after_click: bool,
}

#[derive(Deserialize)]
struct RawPolicy {
    #[serde(rename = "type")]
    kind: String,
    ms: Option<u64>,
    timeout: Option<u64>,
    thing: Option<Value>,
    source: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    click: bool,
}

impl ReadyPolicy {
    pub fn from_json(value: &Value) -> RelayResult<Self> {
        let raw: RawPolicy = serde_json::from_value(value.clone())?;
        let timeout = raw
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READY_TIMEOUT);
        let wait = match raw.kind.as_str() {
            "delay" => ReadyWait::Delay(Duration::from_millis(raw.ms.unwrap_or(0))),
            "document" => ReadyWait::Document { timeout },
            "thing" => {
                let thing = raw
                    .thing
                    .as_ref()
                    .ok_or_else(|| RelayError::InvalidTool("thing policy needs a thing".into()))?;
                ReadyWait::Thing {
                    thing: Thing::from_json(thing)?,
                    timeout,
                }
            }
            "exec" => ReadyWait::Exec {
                source: raw
                    .source
                    .ok_or_else(|| RelayError::InvalidTool("exec policy needs a source".into()))?,
                args: raw.args,
            },
            other => return Err(RelayError::NotFound(format!("unknown ready method {other:?}"))),
        };
        Ok(Self {
            wait,
            after_click: raw.click,
        })
    }

    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = NAVIGATION_KEYS.to_vec();
        if self.after_click {
            keys.push(CLICK_KEY);
        }
        keys
    }

    /// Replaces whatever ready hook was installed before.
    pub fn install(&self, hooks: &HookRegistry<ClientContext>) -> RelayResult<Vec<HookKey>> {
        let wait = self.wait.clone();
        let title = format!("ready:{}", wait.name());
        let hook = Hook::new(title, move |ctx: ClientContext, input| {
            let wait = wait.clone();
            async move {
                wait.wait(&ctx).await?;
                Ok(input.result)
            }
        });
        hooks.set(&self.keys(), Some(hook))
    }
}

impl ReadyWait {
    pub fn name(&self) -> &'static str {
        match self {
            ReadyWait::Delay(_) => "delay",
            ReadyWait::Document { .. } => "document",
            ReadyWait::Thing { .. } => "thing",
            ReadyWait::Exec { .. } => "exec",
        }
    }

    pub async fn wait(&self, ctx: &ClientContext) -> RelayResult<()> {
        match self {
            ReadyWait::Delay(pause) => {
                sleep(*pause).await;
                Ok(())
            }
            ReadyWait::Document { timeout } => {
                poll(*timeout, "document", || {
                    ctx.doc().lock().ready_state == ReadyState::Complete
                })
                .await
            }
            ReadyWait::Thing { thing, timeout } => {
                poll(*timeout, &thing.to_string(), || {
                    resolve(&ctx.doc().lock(), thing, None, Strictness::Loose).is_ok()
                })
                .await
            }
            ReadyWait::Exec { source, args } => {
                ctx.run_script(source, args.clone()).await.map(|_| ())
            }
        }
    }
}

async fn poll<F>(limit: Duration, what: &str, mut check: F) -> RelayResult<()>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    loop {
        if check() {
            debug!(what, waited_ms = started.elapsed().as_millis() as u64, "ready");
            return Ok(());
        }
        if started.elapsed() >= limit {
            return Err(RelayError::Timeout(format!(
                "{what} not ready after {}ms",
                limit.as_millis()
            )));
        }
        sleep(READY_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_each_policy() {
        let delay = ReadyPolicy::from_json(&json!({"type": "delay", "ms": 250})).unwrap();
        assert_eq!(delay.wait, ReadyWait::Delay(Duration::from_millis(250)));
        assert_eq!(delay.keys().len(), 3);

        let thing = ReadyPolicy::from_json(&json!({
            "type": "thing",
            "thing": {"type": "text", "value": "Welcome"},
            "timeout": 1000,
            "click": true
        }))
        .unwrap();
        assert_eq!(
            thing.wait,
            ReadyWait::Thing {
                thing: Thing::text("Welcome"),
                timeout: Duration::from_millis(1000)
            }
        );
        assert!(thing.keys().contains(&"after.input.click"));
    }

    #[test]
    fn unknown_methods_are_not_found() {
        let err = ReadyPolicy::from_json(&json!({"type": "idle"})).unwrap_err();
        assert_eq!(err.name(), "NotFoundError");
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_at_the_limit() {
        let started = Instant::now();
        let err = poll(Duration::from_millis(300), "never", || false)
            .await
            .unwrap_err();
        assert_eq!(err.name(), "TimeoutError");
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
