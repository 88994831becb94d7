use std::sync::Arc;

use crossrun_core_types::{RelayError, ToolPath};
use crossrun_hooks::{Hook, HookRegistry};
use parking_lot::Mutex;
use serde_json::{json, Value};

type Journal = Arc<Mutex<Vec<String>>>;

fn recorder(label: &'static str) -> Hook<Journal> {
    Hook::new(label, move |journal: Journal, input| async move {
        journal.lock().push(format!("{label}:{}", input.result));
        Ok(input.result)
    })
}

fn click() -> ToolPath {
    "input.click".parse().unwrap()
}

#[tokio::test]
async fn runs_before_tool_after_in_order() {
    let registry = HookRegistry::new();
    for key in [
        "before.tool",
        "before.input",
        "before.input.click",
        "after.input.click",
        "after.input",
        "after.tool",
    ] {
        registry.set(&[key], Some(recorder(key_label(key)))).unwrap();
    }
    let journal: Journal = Arc::default();

    let result = registry
        .dispatch(&journal, &click(), vec![json!("Submit")], |journal: Journal, args| async move {
            journal.lock().push(format!("tool:{}", args[0]));
            Ok(json!("clicked"))
        })
        .await
        .unwrap();

    assert_eq!(result, json!("clicked"));
    assert_eq!(
        *journal.lock(),
        vec![
            "bt:null",
            "bs:null",
            "bn:null",
            "tool:\"Submit\"",
            "an:\"clicked\"",
            "as:\"clicked\"",
            "at:\"clicked\"",
        ]
    );
}

fn key_label(key: &str) -> &'static str {
    match key {
        "before.tool" => "bt",
        "before.input" => "bs",
        "before.input.click" => "bn",
        "after.input.click" => "an",
        "after.input" => "as",
        _ => "at",
    }
}

#[tokio::test]
async fn after_hooks_can_replace_the_result() {
    let registry: HookRegistry<()> = HookRegistry::new();
    registry
        .set(
            &["after.input"],
            Some(Hook::new("wrap", |_, input| async move {
                Ok(json!({ "wrapped": input.result }))
            })),
        )
        .unwrap();
    let out = registry
        .dispatch(&(), &click(), vec![], |_, _| async { Ok(json!(1)) })
        .await
        .unwrap();
    assert_eq!(out, json!({ "wrapped": 1 }));
}

#[tokio::test]
async fn skip_is_consumed_once() {
    let registry = HookRegistry::new();
    registry.set(&["before.input.click"], Some(recorder("hook"))).unwrap();
    assert!(registry.skip("before.input.click").unwrap());
    assert!(!registry.skip("before.input.hover").unwrap());
    let journal: Journal = Arc::default();

    for _ in 0..2 {
        registry
            .dispatch(&journal, &click(), vec![], |_, _| async { Ok(Value::Null) })
            .await
            .unwrap();
    }
    assert_eq!(*journal.lock(), vec!["hook:null"]);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn failing_before_hook_stops_the_call() {
    let registry: HookRegistry<Journal> = HookRegistry::new();
    registry
        .set(
            &["before.tool"],
            Some(Hook::new("guard", |_, _| async {
                Err(RelayError::Precondition("not ready".into()))
            })),
        )
        .unwrap();
    let journal: Journal = Arc::default();
    let err = registry
        .dispatch(&journal, &click(), vec![], |journal: Journal, _| async move {
            journal.lock().push("tool".into());
            Ok(Value::Null)
        })
        .await
        .unwrap_err();
    assert_eq!(err.name(), "PreconditionError");
    assert!(journal.lock().is_empty());
}

#[tokio::test]
async fn failed_once_hook_stays_registered() {
    let registry: HookRegistry<()> = HookRegistry::new();
    registry
        .set(
            &["after.tool"],
            Some(Hook::new("flaky", |_, _| async { Err(RelayError::Timeout("late".into())) }).once()),
        )
        .unwrap();
    let outcome = registry
        .dispatch(&(), &click(), vec![], |_, _| async { Ok(Value::Null) })
        .await;
    assert!(outcome.is_err());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn null_registration_clears_keys() {
    let registry = HookRegistry::new();
    registry.set(&["before.input", "after.input"], Some(recorder("x"))).unwrap();
    registry.set(&["before.input"], None).unwrap();
    let keys: Vec<String> = registry.keys().iter().map(ToString::to_string).collect();
    assert_eq!(keys, ["after.input"]);
}

#[tokio::test]
async fn use_installs_a_table_and_leaves_other_keys_alone() {
    let registry = HookRegistry::new();
    registry.set(&["after.tool"], Some(recorder("at"))).unwrap();
    registry.set(&["before.input"], Some(recorder("old"))).unwrap();

    let keys = registry
        .use_hooks([
            ("before.input.click", Some(recorder("bn"))),
            ("before.input", Some(recorder("bs"))),
        ])
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(registry.len(), 3);

    let journal: Journal = Arc::default();
    registry
        .dispatch(&journal, &click(), vec![], |_journal: Journal, _args| async move {
            Ok(json!("clicked"))
        })
        .await
        .unwrap();
    assert_eq!(
        *journal.lock(),
        vec!["bs:null", "bn:null", "at:\"clicked\""]
    );

    registry.use_hooks([("before.input", None)]).unwrap();
    assert_eq!(registry.len(), 2);
    let err = registry.use_hooks([("*", Some(recorder("all")))]).unwrap_err();
    assert_eq!(err.name(), "HookError");
    assert_eq!(registry.len(), 2);
}
