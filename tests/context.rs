use std::sync::Arc;
use std::time::Duration;

use crossrun_actions::SeededCadence;
use crossrun_catalog::Catalog;
use crossrun_cli::{Arg, Context};
use crossrun_client::{ClientContext, ClientRuntime, PageSet};
use crossrun_core_types::Thing;
use crossrun_dom::Document;
use crossrun_event_bus::wait_for;
use crossrun_transport::{HubConfig, HubEvent, SessionHub};
use serde_json::{json, Value};
use tokio::time::Instant;

fn form_page(url: &str) -> Document {
    let mut doc = Document::new(url);
    doc.title = "Form".into();
    let body = doc.body();
    doc.append_element(body, "input", &[("name", "q")]);
    let button = doc.append_element(body, "button", &[("id", "go")]);
    doc.append_text(button, "Submit");
    doc.storage
        .session
        .insert("crossrun.token".into(), "a1b2".into());
    doc
}

fn next_page(url: &str) -> Document {
    let mut doc = Document::new(url);
    doc.title = "Next".into();
    let body = doc.body();
    let heading = doc.append_element(body, "h1", &[]);
    doc.append_text(heading, "Welcome back");
    doc
}

async fn connect(slow: Duration) -> (Context, ClientContext) {
    let hub = SessionHub::new(HubConfig::default());
    let mut events = hub.subscribe();
    let runtime = ClientRuntime::builder(form_page("http://localhost/form"))
        .hub(&hub)
        .cadence(Arc::new(SeededCadence::new(5)))
        .loader(Arc::new(
            PageSet::new().page("http://localhost/next", next_page),
        ))
        .build()
        .unwrap();
    let client = runtime.context().clone();
    tokio::spawn(async move { runtime.run().await });
    let token = match wait_for(&mut events, Some(Duration::from_secs(5)), |ev| {
        matches!(ev, HubEvent::Connected { .. })
    })
    .await
    .unwrap()
    {
        HubEvent::Connected { token, .. } => token,
        other => panic!("unexpected event {other:?}"),
    };
    let catalog = Catalog::build(hub.clone());
    (Context::new(hub, catalog, token, slow), client)
}

#[tokio::test(start_paused = true)]
async fn queued_calls_reach_the_page_in_call_order() {
    let (ctx, client) = connect(Duration::from_millis(100)).await;
    let input = Thing::node("input[name=q]");

    let started = Instant::now();
    let typed = ctx.type_text("hi", Some(input.clone().into()));
    let cleared = ctx.clear(Some(input.clone().into()), false);
    let retyped = ctx.type_text("ok", Some(input.into()));
    ctx.now().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(typed.await.unwrap()["delays"].is_array());
    assert_eq!(cleared.await.unwrap(), json!(2));
    retyped.await.unwrap();

    let doc = client.doc().lock();
    let node = doc.query_selector(doc.root(), "input").unwrap().unwrap();
    assert_eq!(doc.value(node), Some("ok"));
}

#[tokio::test(start_paused = true)]
async fn atomic_clear_empties_the_field_in_one_step() {
    let (ctx, client) = connect(Duration::ZERO).await;
    let input = Thing::node("input[name=q]");

    let _typed = ctx.type_text("hello", Some(input.clone().into()));
    ctx.now().await.unwrap();
    let started = Instant::now();
    let cleared = ctx.clear(Some(input.into()), true);
    ctx.now().await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(5));
    assert_eq!(cleared.await.unwrap(), json!(5));
    let doc = client.doc().lock();
    let node = doc.query_selector(doc.root(), "input").unwrap().unwrap();
    assert_eq!(doc.value(node), Some(""));
}

#[tokio::test]
async fn navigation_resumes_the_session_before_the_next_call() {
    let (ctx, client) = connect(Duration::ZERO).await;

    let _ready = ctx.ready(json!({"type": "document"}));
    let navigated = ctx.navigate("/next");
    let heading = ctx.find(Thing::text("Welcome back"));
    ctx.now().await.unwrap();

    assert_eq!(navigated.await.unwrap(), Value::Null);
    assert_eq!(heading.await.unwrap(), json!(["<h1>"]));
    let info = ctx.hub().session(ctx.token()).unwrap();
    assert_eq!(info.reconnects, 1);
    assert_eq!(ctx.hub().len(), 1);
    assert_eq!(client.doc().lock().title, "Next");
}

#[tokio::test(start_paused = true)]
async fn until_gives_up_on_schedule() {
    let (ctx, _client) = connect(Duration::ZERO).await;

    let started = Instant::now();
    let waited = ctx.until(
        "query.find",
        vec![json!("Never there")],
        Some(Duration::from_millis(50)),
        Some(Duration::from_millis(1000)),
    );
    let skipped = ctx.click(Arg::from("Submit"));
    let err = ctx.now().await.unwrap_err();

    assert_eq!(err.name(), "TimeoutError");
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(started.elapsed() < Duration::from_millis(1100));
    assert_eq!(waited.await.unwrap_err().name(), "TimeoutError");
    assert_eq!(skipped.await.unwrap_err().name(), "AbortError");
}

#[tokio::test]
async fn while_stops_at_the_first_rejection() {
    let (ctx, _client) = connect(Duration::ZERO).await;
    let out = ctx.while_ok("query.not", vec![json!("Submit")], Some(Duration::from_millis(5)));
    ctx.now().await.unwrap();
    assert_eq!(out.await.unwrap(), Value::Null);
}

#[tokio::test]
async fn flaws_are_visible_to_the_test() {
    let (ctx, _client) = connect(Duration::ZERO).await;
    assert!(!ctx.flaws().any());
    ctx.log("info", "hello from the suite").unwrap();
}
