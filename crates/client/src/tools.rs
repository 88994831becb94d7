//! Client side of every remote command.
//!
//! Argument layout per command:
//!
//! | command | args |
//! |---|---|
//! | `query.find` / `query.is` / `query.not` / `query.value` | `[thing, where?, strict?]` |
//! | `input.click` / `input.dblclick` / `input.hover` | `[thing, where?, strict?]` |
//! | `input.type` / `input.paste` | `[text, thing?, where?]` |
//! | `input.clear` | `[thing?, atomic?]` |
//! | `client.navigate` | `[url]` |
//! | `client.reset` | `[url \| true \| null]` |
//! | `hooks.ready` | `[policy]` |
//! | `hooks.skip` | `[key]` |
//!
//! A bare string where a thing is expected means a text thing.

use crossrun_actions::{navigate, reload, reset, ResetMode};
use crossrun_catalog::CommandId;
use crossrun_core_types::{RelayError, RelayResult, Thing};
use crossrun_dom::{Document, NodeId};
use crossrun_perceiver::{describe, describe_all, find, reach, resolve, Resolved, Strictness};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::context::ClientContext;
use crate::memo::Memo;
use crate::ready::ReadyPolicy;

fn arg(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|value| !value.is_null())
}

fn thing_arg(args: &[Value], index: usize) -> RelayResult<Option<Thing>> {
    match arg(args, index) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(Thing::text(text.as_str()))),
        Some(value) => Thing::from_json(value).map(Some),
    }
}

fn required_thing(args: &[Value], index: usize, command: CommandId) -> RelayResult<Thing> {
    thing_arg(args, index)?
        .ok_or_else(|| RelayError::InvalidTool(format!("{command} needs a thing to look for")))
}

fn text_arg(args: &[Value], index: usize, command: CommandId) -> RelayResult<String> {
    match arg(args, index) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RelayError::InvalidTool(format!("{command} needs text"))),
    }
}

/// The node a pointer action lands on.
fn reachable_target(
    doc: &Document,
    thing: &Thing,
    within: Option<&Thing>,
    strictness: Strictness,
) -> RelayResult<NodeId> {
    let nodes = find(doc, thing, within, strictness)?;
    reach(doc, &nodes, strictness)
}

fn query_args(args: &[Value], command: CommandId) -> RelayResult<(Thing, Option<Thing>, Strictness)> {
    Ok((
        required_thing(args, 0, command)?,
        thing_arg(args, 1)?,
        Strictness::from_arg(args.get(2)),
    ))
}

fn node_value(doc: &Document, node: NodeId) -> Value {
    match doc.value(node) {
        Some(value) => Value::String(value.to_string()),
        None => Value::String(doc.inner_text(node)),
    }
}

/// Optional text-entry target: the first reachable match, else the focused element.
fn entry_target(
    ctx: &ClientContext,
    thing: Option<Thing>,
    within: Option<Thing>,
) -> RelayResult<Option<NodeId>> {
    let Some(thing) = thing else {
        return Ok(None);
    };
    let doc = ctx.doc().lock();
    reachable_target(&doc, &thing, within.as_ref(), Strictness::Loose).map(Some)
}

/// Runs one command against the current page.
#[instrument(skip(ctx, args), fields(command = %command))]
pub async fn run_tool(ctx: ClientContext, command: CommandId, args: Vec<Value>) -> RelayResult<Value> {
    match command {
        CommandId::QueryFind => {
            let (thing, within, strictness) = query_args(&args, command)?;
            let doc = ctx.doc().lock();
            match resolve(&doc, &thing, within.as_ref(), strictness)? {
                Resolved::Nodes(nodes) => Ok(describe_all(&doc, &nodes)),
                Resolved::Value(value) => Ok(value),
            }
        }
        CommandId::QueryIs => {
            let (thing, within, strictness) = query_args(&args, command)?;
            let doc = ctx.doc().lock();
            match resolve(&doc, &thing, within.as_ref(), strictness)? {
                Resolved::Nodes(nodes) => {
                    let node = reach(&doc, &nodes, strictness)?;
                    Ok(Value::String(describe(&doc, node)))
                }
                Resolved::Value(value) => Ok(value),
            }
        }
        CommandId::QueryNot => {
            let (thing, within, strictness) = query_args(&args, command)?;
            let doc = ctx.doc().lock();
            match resolve(&doc, &thing, within.as_ref(), strictness) {
                Ok(Resolved::Nodes(nodes)) => Err(RelayError::Precondition(format!(
                    "{thing} was found: {}",
                    describe(&doc, nodes[0])
                ))),
                Ok(Resolved::Value(value)) => Err(RelayError::Precondition(format!(
                    "{thing} was found: {value}"
                ))),
                Err(err) if err.is_not_found() => Ok(Value::Null),
                Err(err) => Err(err),
            }
        }
        CommandId::QueryValue => {
            let (thing, within, strictness) = query_args(&args, command)?;
            let doc = ctx.doc().lock();
            match resolve(&doc, &thing, within.as_ref(), strictness)? {
                Resolved::Nodes(nodes) => Ok(node_value(&doc, nodes[0])),
                Resolved::Value(value) => Ok(value),
            }
        }
        CommandId::InputClick | CommandId::InputDblclick | CommandId::InputHover => {
            let (thing, within, strictness) = query_args(&args, command)?;
            let node = {
                let doc = ctx.doc().lock();
                reachable_target(&doc, &thing, within.as_ref(), strictness)?
            };
            let actions = ctx.actions();
            match command {
                CommandId::InputClick => actions.click(ctx.doc(), node)?,
                CommandId::InputDblclick => actions.dblclick(ctx.doc(), node)?,
                _ => actions.hover(ctx.doc(), node),
            }
            Ok(Value::Null)
        }
        CommandId::InputType => {
            let text = text_arg(&args, 0, command)?;
            let target = entry_target(&ctx, thing_arg(&args, 1)?, thing_arg(&args, 2)?)?;
            let plan = ctx.actions().type_text(ctx.doc(), target, &text).await?;
            Ok(json!({ "delays": plan.steps.iter().map(|s| s.delay_ms).collect::<Vec<_>>() }))
        }
        CommandId::InputPaste => {
            let text = text_arg(&args, 0, command)?;
            let target = entry_target(&ctx, thing_arg(&args, 1)?, thing_arg(&args, 2)?)?;
            ctx.actions().paste(ctx.doc(), target, &text)?;
            Ok(Value::Null)
        }
        CommandId::InputClear => {
            // No `where` slot: the second argument is the atomic flag.
            let target = entry_target(&ctx, thing_arg(&args, 0)?, None)?;
            let atomic = arg(&args, 1).and_then(Value::as_bool).unwrap_or(false);
            let removed = ctx.actions().clear(ctx.doc(), target, atomic).await?;
            Ok(Value::from(removed))
        }
        CommandId::ClientNavigate => {
            let url = text_arg(&args, 0, command)?;
            navigate(&mut ctx.doc().lock(), &url);
            Ok(Value::Null)
        }
        CommandId::ClientReload => {
            reload(&mut ctx.doc().lock());
            Ok(Value::Null)
        }
        CommandId::ClientReset => {
            let mode = match arg(&args, 0) {
                None | Some(Value::Bool(false)) => ResetMode::InPlace,
                Some(Value::Bool(true)) => ResetMode::Reload,
                Some(Value::String(url)) => ResetMode::Navigate(url.clone()),
                Some(other) => {
                    return Err(RelayError::InvalidTool(format!(
                        "reset expects a url or a reload flag, got {other}"
                    )))
                }
            };
            ctx.hooks().clear();
            let mut doc = ctx.doc().lock();
            let memo = Memo::read(&doc);
            let report = reset(&mut doc, &mode);
            memo.write(&mut doc);
            debug!(?report, "storage reset");
            Ok(json!({
                "cookies": report.cookies,
                "local": report.local,
                "session": report.session,
                "databases": report.databases,
            }))
        }
        CommandId::HooksReady => {
            let policy = arg(&args, 0)
                .ok_or_else(|| RelayError::InvalidTool("hooks.ready needs a policy".into()))?;
            let policy = ReadyPolicy::from_json(policy)?;
            let keys = policy.install(ctx.hooks())?;
            Ok(Value::Array(
                keys.iter().map(|key| Value::String(key.to_string())).collect(),
            ))
        }
        CommandId::HooksClear => {
            let count = ctx.hooks().len();
            ctx.hooks().clear();
            Ok(Value::from(count))
        }
        CommandId::HooksSkip => {
            let key = text_arg(&args, 0, command)?;
            Ok(Value::Bool(ctx.hooks().skip(&key)?))
        }
        CommandId::RunnerDelay | CommandId::RunnerUntil | CommandId::RunnerWhile => {
            Err(RelayError::InvalidTool(format!(
                "{command} runs on the server, not in the page"
            )))
        }
    }
}
