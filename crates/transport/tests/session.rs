use std::sync::Arc;
use std::time::Duration;

use crossrun_catalog::ToolCall;
use crossrun_core_types::{RelayError, SessionToken};
use crossrun_event_bus::wait_for;
use crossrun_transport::{
    memory_link, FinishOptions, Frame, HubConfig, HubEvent, LinkEnd, MessageKind, SessionHub,
    SessionState,
};
use serde_json::{json, Value};
use tokio::time::timeout;

struct Peer {
    link: LinkEnd,
}

impl Peer {
    async fn connect(hub: &Arc<SessionHub>, payload: Value) -> (Peer, Frame) {
        let (server, client) = memory_link();
        let served = hub.clone();
        tokio::spawn(async move { served.serve_link(server).await });
        let mut peer = Peer { link: client };
        peer.send(json!([0, "connect", payload]));
        let ready = peer.next().await;
        (peer, ready)
    }

    fn send(&self, frame: Value) {
        assert!(self.link.send(frame.to_string()));
    }

    async fn next(&mut self) -> Frame {
        let text = timeout(Duration::from_secs(5), self.link.recv())
            .await
            .expect("frame in time")
            .expect("link open");
        Frame::decode(&text).unwrap()
    }

    /// Next frame that is not an ack from the server.
    async fn next_message(&mut self) -> Frame {
        loop {
            let frame = self.next().await;
            if !matches!(frame, Frame::Message { kind: MessageKind::Ack, .. }) {
                return frame;
            }
        }
    }
}

fn token() -> SessionToken {
    "a1b2".parse().unwrap()
}

fn tool(path: &str, wait_reconnect: bool) -> ToolCall {
    ToolCall {
        token: token(),
        path: path.into(),
        args: vec![json!({"type": "text", "value": "Submit"})],
        wait_reconnect,
    }
}

fn expect_message(frame: Frame, kind: MessageKind) -> (u64, Value) {
    match frame {
        Frame::Message {
            id,
            kind: got,
            payload,
        } if got == kind => (id, payload),
        other => panic!("expected {kind}, got {other:?}"),
    }
}

#[tokio::test]
async fn fresh_connection_adopts_a_well_formed_token() {
    let hub = SessionHub::new(HubConfig::default());
    let (_peer, ready) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let (id, payload) = expect_message(ready, MessageKind::Ready);
    assert_eq!(id, 0);
    assert_eq!(payload, json!({"token": "a1b2", "resumed": false}));
    assert_eq!(hub.session(&token()).unwrap().state, SessionState::Ready);
}

#[tokio::test]
async fn first_contact_mints_a_token() {
    let hub = SessionHub::new(HubConfig::default());
    let (_peer, ready) = Peer::connect(&hub, json!({"flaws": {"inputEvent": true}})).await;
    let (_, payload) = expect_message(ready, MessageKind::Ready);
    let minted: SessionToken = serde_json::from_value(payload["token"].clone()).unwrap();
    let info = hub.session(&minted).unwrap();
    assert!(info.flaws.input_event);
}

#[tokio::test]
async fn tool_calls_resolve_with_their_reply() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut peer, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let caller = hub.clone();
    let call = tokio::spawn(async move { caller.tool(tool("input.click", false)).await });
    let (id, payload) = expect_message(peer.next_message().await, MessageKind::Tool);
    assert_eq!(payload["path"], "input.click");
    assert_eq!(payload["reconnect"], false);
    peer.send(json!([id, "ack", null]));
    peer.send(json!([id, [{"clicked": true}, null]]));
    assert_eq!(call.await.unwrap().unwrap(), json!({"clicked": true}));

    let caller = hub.clone();
    let call = tokio::spawn(async move { caller.tool(tool("input.click", false)).await });
    let (id, _) = expect_message(peer.next_message().await, MessageKind::Tool);
    peer.send(json!([id, [null, {
        "name": "PreconditionError",
        "message": "<button id=\"go\"> is disabled",
        "stack": "at click (app.js:3)\nat crossrun_transport::hub::resolve"
    }]]));
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.name(), "PreconditionError");
    assert_eq!(err.to_string(), "<button id=\"go\"> is disabled");
    assert_eq!(err.stack(), Some("at click (app.js:3)"));
}

#[tokio::test]
async fn client_logs_are_acknowledged() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut peer, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    peer.send(json!([7, "log", {"level": "info", "message": "hello"}]));
    let (id, _) = expect_message(peer.next().await, MessageKind::Ack);
    assert_eq!(id, 7);
}

#[tokio::test]
async fn reconnect_resumes_and_redelivers_persistent_scripts_first() {
    let hub = SessionHub::new(HubConfig::default());
    let mut events = hub.subscribe();
    let (mut first, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let mut urls = Vec::new();
    for source in ["polyfill()", "mock()"] {
        let caller = hub.clone();
        let exec = tokio::spawn(async move { caller.exec(&token(), source, vec![], true).await });
        let (id, payload) = expect_message(first.next_message().await, MessageKind::Exec);
        urls.push(payload["url"].as_str().unwrap().to_string());
        first.send(json!([id, [null, null]]));
        exec.await.unwrap().unwrap();
    }

    let caller = hub.clone();
    let navigate = tokio::spawn(async move { caller.tool(tool("client.navigate", true)).await });
    let (id, payload) = expect_message(first.next_message().await, MessageKind::Tool);
    assert_eq!(payload["reconnect"], true);
    first.send(json!([id, "ack", null]));
    tokio::task::yield_now().await;
    drop(first);
    wait_for(&mut events, Some(Duration::from_secs(5)), |ev| {
        matches!(ev, HubEvent::Disconnected { .. })
    })
    .await
    .unwrap();
    assert_eq!(hub.session(&token()).unwrap().state, SessionState::Disconnected);

    let caller = hub.clone();
    let queued = tokio::spawn(async move { caller.tool(tool("input.click", false)).await });
    tokio::task::yield_now().await;

    let (mut second, ready) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let (_, payload) = expect_message(ready, MessageKind::Ready);
    assert_eq!(payload["resumed"], true);

    let mut redelivered = Vec::new();
    for url in &urls {
        let (id, payload) = expect_message(second.next_message().await, MessageKind::Exec);
        assert_eq!(payload["url"], url.as_str());
        assert!(!navigate.is_finished());
        second.send(json!([id, [null, null]]));
        redelivered.push(id);
    }

    // The queued click follows the scripts in id order too.
    let (id, payload) = expect_message(second.next_message().await, MessageKind::Tool);
    assert_eq!(payload["path"], "input.click");
    assert!(redelivered.iter().all(|script| *script < id));
    assert_eq!(navigate.await.unwrap().unwrap(), Value::Null);
    second.send(json!([id, ["clicked", null]]));
    assert_eq!(queued.await.unwrap().unwrap(), json!("clicked"));

    assert_eq!(hub.len(), 1);
    let info = hub.session(&token()).unwrap();
    assert_eq!(info.reconnects, 1);
    assert_eq!(info.state, SessionState::Ready);
    assert_eq!(info.persistent, urls);
}

#[tokio::test]
async fn acknowledged_calls_lost_with_the_page_are_rejected() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut first, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let caller = hub.clone();
    let call = tokio::spawn(async move { caller.tool(tool("input.type", false)).await });
    let (id, _) = expect_message(first.next_message().await, MessageKind::Tool);
    first.send(json!([id, "ack", null]));
    tokio::task::yield_now().await;
    drop(first);

    let (_second, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.name(), "TransportError");
}

#[tokio::test]
async fn carried_reply_settles_the_call() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut first, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let caller = hub.clone();
    let call = tokio::spawn(async move { caller.tool(tool("query.find", false)).await });
    let (id, _) = expect_message(first.next_message().await, MessageKind::Tool);
    first.send(json!([id, "ack", null]));
    tokio::task::yield_now().await;
    drop(first);

    let (_second, _) = Peer::connect(
        &hub,
        json!({"token": "a1b2", "last": id, "reply": [id, [["<button>"], null]]}),
    )
    .await;
    assert_eq!(call.await.unwrap().unwrap(), json!(["<button>"]));
}

#[tokio::test]
async fn a_second_connection_evicts_the_first() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut first, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let (_second, ready) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let (_, payload) = expect_message(ready, MessageKind::Ready);
    assert_eq!(payload["resumed"], true);

    let closed = timeout(Duration::from_secs(5), first.link.recv()).await.unwrap();
    assert_eq!(closed, None);
    assert_eq!(hub.len(), 1);
}

#[tokio::test]
async fn an_evicted_connection_is_no_longer_heard() {
    let hub = SessionHub::new(HubConfig::default());
    let (first, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let (mut second, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    first.send(json!([9, "log", {"level": "info", "message": "from the old page"}]));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    second.send(json!([10, "log", {"level": "info", "message": "from the new page"}]));

    let (id, _) = expect_message(second.next().await, MessageKind::Ack);
    assert_eq!(id, 10);
}

#[tokio::test]
async fn connections_must_open_with_a_handshake() {
    let hub = SessionHub::new(HubConfig::default());
    let (server, client) = memory_link();
    client.send(json!([1, "tool", {"path": "input.click"}]).to_string());
    hub.serve_link(server).await;
    assert!(hub.is_empty());
}

#[tokio::test(start_paused = true)]
async fn finish_survives_an_unresponsive_client() {
    let hub = SessionHub::new(HubConfig::default());
    let mut events = hub.subscribe();
    let (_peer, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let started = tokio::time::Instant::now();
    let outcome = hub
        .finish(
            &token(),
            FinishOptions {
                collect_coverage: false,
                runner_error: Some(RelayError::Precondition("test failed".into())),
            },
        )
        .await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(2100));
    assert_eq!(outcome.error.unwrap().name(), "PreconditionError");
    assert!(hub.is_empty());

    let finished = wait_for(&mut events, Some(Duration::from_secs(1)), |ev| {
        matches!(ev, HubEvent::Finished { .. })
    })
    .await
    .unwrap();
    match finished {
        HubEvent::Finished { error, .. } => {
            assert_eq!(error.unwrap().message, "test failed");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn end_timeout_is_reported_without_a_runner_error() {
    let hub = SessionHub::new(HubConfig::default());
    let (_peer, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;
    let outcome = hub.finish(&token(), FinishOptions::default()).await;
    assert_eq!(outcome.error.unwrap().name(), "TimeoutError");
}

#[tokio::test]
async fn cooperative_finish_collects_coverage() {
    let hub = SessionHub::new(HubConfig::default());
    let (mut peer, _) = Peer::connect(&hub, json!({"token": "a1b2"})).await;

    let finisher = hub.clone();
    let finish = tokio::spawn(async move {
        finisher
            .finish(
                &token(),
                FinishOptions {
                    collect_coverage: true,
                    runner_error: None,
                },
            )
            .await
    });

    let (id, _) = expect_message(peer.next_message().await, MessageKind::Coverage);
    peer.send(json!([id, [{"app.js": {"s": {"1": 3}}}, null]]));
    let (id, _) = expect_message(peer.next_message().await, MessageKind::End);
    peer.send(json!([id, [null, null]]));
    expect_message(peer.next_message().await, MessageKind::Finish);

    let outcome = finish.await.unwrap();
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.coverage, Some(json!({"app.js": {"s": {"1": 3}}})));
    assert!(hub.session(&token()).is_none());
}
