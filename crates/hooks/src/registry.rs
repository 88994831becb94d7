use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossrun_core_types::{RelayResult, ToolPath};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::key::{HookKey, Stage};

/// What a hook sees: the call it wraps and the running result.
#[derive(Clone, Debug)]
pub struct HookInput {
    pub key: HookKey,
    pub path: ToolPath,
    pub args: Vec<Value>,
    pub result: Value,
}

pub type HookFn<C> = Arc<dyn Fn(C, HookInput) -> BoxFuture<'static, RelayResult<Value>> + Send + Sync>;

/// A registered interceptor. One hook may sit under several keys; its
/// `once` and `skip` flags are shared between them.
pub struct Hook<C> {
    title: String,
    once: bool,
    skip: AtomicBool,
    run: HookFn<C>,
}

impl<C> Hook<C> {
    pub fn new<F, Fut>(title: impl Into<String>, run: F) -> Self
    where
        F: Fn(C, HookInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RelayResult<Value>> + Send + 'static,
    {
        Self {
            title: title.into(),
            once: false,
            skip: AtomicBool::new(false),
            run: Arc::new(move |ctx, input| run(ctx, input).boxed()),
        }
    }

    /// Removed after its first successful run.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_once(&self) -> bool {
        self.once
    }

    /// Bypasses the next invocation only.
    pub fn skip_next(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::SeqCst)
    }
}

impl<C> fmt::Debug for Hook<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("title", &self.title)
            .field("once", &self.once)
            .field("skip", &self.skip.load(Ordering::Relaxed))
            .finish()
    }
}

/// Hooks by key. `C` is whatever context the hooks need at run time.
pub struct HookRegistry<C> {
    hooks: RwLock<BTreeMap<HookKey, Arc<Hook<C>>>>,
}

impl<C> Default for HookRegistry<C> {
    fn default() -> Self {
        Self {
            hooks: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<C> fmt::Debug for HookRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.hooks.read().iter()).finish()
    }
}

impl<C> HookRegistry<C>
where
    C: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `hook` under every key in `filters`, replacing what was
    /// there; `None` removes instead. `*` stands for every key currently
    /// registered. Returns the keys touched.
    pub fn set(&self, filters: &[&str], hook: Option<Hook<C>>) -> RelayResult<Vec<HookKey>> {
        let mut hooks = self.hooks.write();
        let mut keys = Vec::new();
        for filter in filters {
            if filter.trim() == "*" {
                keys.extend(hooks.keys().cloned());
            } else {
                keys.push(filter.parse::<HookKey>()?);
            }
        }
        keys.sort();
        keys.dedup();

        match hook {
            Some(hook) => {
                let hook = Arc::new(hook);
                for key in &keys {
                    debug!(key = %key, title = %hook.title, "hook installed");
                    hooks.insert(key.clone(), hook.clone());
                }
            }
            None => {
                for key in &keys {
                    if hooks.remove(key).is_some() {
                        debug!(key = %key, "hook removed");
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Installs a table of hooks, each under its own key, in one step.
    /// Keys not named in the table keep what they have; a `None` entry
    /// removes its key. `*` is not accepted here.
    pub fn use_hooks<'a, I>(&self, table: I) -> RelayResult<Vec<HookKey>>
    where
        I: IntoIterator<Item = (&'a str, Option<Hook<C>>)>,
    {
        let entries = table
            .into_iter()
            .map(|(key, hook)| Ok((key.parse::<HookKey>()?, hook)))
            .collect::<RelayResult<Vec<_>>>()?;

        let mut hooks = self.hooks.write();
        let mut keys = Vec::with_capacity(entries.len());
        for (key, hook) in entries {
            match hook {
                Some(hook) => {
                    debug!(key = %key, title = %hook.title, "hook installed");
                    hooks.insert(key.clone(), Arc::new(hook));
                }
                None => {
                    if hooks.remove(&key).is_some() {
                        debug!(key = %key, "hook removed");
                    }
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Flags the hook under `key` to sit out its next invocation.
    /// Returns false when nothing is registered there.
    pub fn skip(&self, key: &str) -> RelayResult<bool> {
        let key: HookKey = key.parse()?;
        match self.hooks.read().get(&key) {
            Some(hook) => {
                hook.skip_next();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, key: &HookKey) -> Option<Arc<Hook<C>>> {
        self.hooks.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<HookKey> {
        self.hooks.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    pub fn clear(&self) {
        let mut hooks = self.hooks.write();
        debug!(count = hooks.len(), "hooks cleared");
        hooks.clear();
    }

    /// Runs one stage of the pipeline for a call to `path`, threading
    /// `result` through each hook in order.
    pub async fn run_stage(
        &self,
        ctx: &C,
        path: &ToolPath,
        args: &[Value],
        stage: Stage,
        mut result: Value,
    ) -> RelayResult<Value> {
        for key in HookKey::for_call(path, stage) {
            let Some(hook) = self.get(&key) else {
                continue;
            };
            if hook.take_skip() {
                debug!(key = %key, title = %hook.title, "hook skipped");
                continue;
            }
            trace!(key = %key, title = %hook.title, "running hook");
            let input = HookInput {
                key: key.clone(),
                path: path.clone(),
                args: args.to_vec(),
                result,
            };
            result = (hook.run)(ctx.clone(), input).await?;
            if hook.once {
                self.retire(&hook);
            }
        }
        Ok(result)
    }

    /// Before hooks, the tool itself, then after hooks.
    pub async fn dispatch<F, Fut>(
        &self,
        ctx: &C,
        path: &ToolPath,
        args: Vec<Value>,
        tool: F,
    ) -> RelayResult<Value>
    where
        F: FnOnce(C, Vec<Value>) -> Fut,
        Fut: Future<Output = RelayResult<Value>>,
    {
        self.run_stage(ctx, path, &args, Stage::Before, Value::Null)
            .await?;
        let result = tool(ctx.clone(), args.clone()).await?;
        self.run_stage(ctx, path, &args, Stage::After, result).await
    }

    /// Drops a one-shot hook from every key it was installed under.
    fn retire(&self, hook: &Arc<Hook<C>>) {
        self.hooks.write().retain(|key, installed| {
            let keep = !Arc::ptr_eq(installed, hook);
            if !keep {
                debug!(key = %key, title = %hook.title, "one-shot hook retired");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> ToolPath {
        raw.parse().unwrap()
    }

    #[test]
    fn star_targets_registered_keys_only() {
        let registry: HookRegistry<()> = HookRegistry::new();
        registry
            .set(&["before.input", "after.client.navigate"], Some(Hook::new("a", |_, i| async move { Ok(i.result) })))
            .unwrap();
        let removed = registry.set(&["*"], None).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn bad_filters_fail_before_touching_state() {
        let registry: HookRegistry<()> = HookRegistry::new();
        let err = registry
            .set(&["before.tool", "sometime.tool"], Some(Hook::new("x", |_, i| async move { Ok(i.result) })))
            .unwrap_err();
        assert_eq!(err.name(), "HookError");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn once_hooks_leave_every_key() {
        let registry: HookRegistry<()> = HookRegistry::new();
        registry
            .set(
                &["after.client.navigate", "after.client.reload"],
                Some(Hook::new("ready", |_, _| async { Ok(Value::Bool(true)) }).once()),
            )
            .unwrap();
        let out = registry
            .run_stage(&(), &path("client.reload"), &[], Stage::After, Value::Null)
            .await
            .unwrap();
        assert_eq!(out, Value::Bool(true));
        assert!(registry.is_empty());
    }
}
