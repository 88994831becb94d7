use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossrun_catalog::{RemoteInvoker, ToolCall};
use crossrun_core_types::{
    ErrorDescriptor, Flaws, MessageId, RelayError, RelayResult, SessionToken, HANDSHAKE_ID,
};
use crossrun_event_bus::{EventBus, InMemoryBus};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{
    ConnectPayload, ExecPayload, Frame, LogPayload, MessageKind, ReadyPayload, ToolPayload,
};
use crate::errors::{TransportError, TransportResult};
use crate::link::LinkEnd;
use crate::metrics;
use crate::scripts::ScriptRegistry;
use crate::state::SessionState;

/// Ceiling on the `end` handshake.
pub const DEFAULT_END_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub end_timeout: Duration,
    /// Keep exec scripts fetchable after delivery.
    pub retain_scripts: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            end_timeout: DEFAULT_END_TIMEOUT,
            retain_scripts: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HubEvent {
    Connected {
        token: SessionToken,
        flaws: Flaws,
        resumed: bool,
    },
    Disconnected {
        token: SessionToken,
    },
    Finished {
        token: SessionToken,
        error: Option<ErrorDescriptor>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct FinishOptions {
    pub collect_coverage: bool,
    pub runner_error: Option<RelayError>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinishOutcome {
    pub coverage: Option<Value>,
    /// The runner's error when there was one, else whatever went wrong in teardown.
    pub error: Option<RelayError>,
}

/// Read-only view of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    pub token: SessionToken,
    pub state: SessionState,
    pub flaws: Flaws,
    pub reconnects: u32,
    pub pending: usize,
    pub unacked: usize,
    pub persistent: Vec<String>,
}

struct PendingCall {
    kind: MessageKind,
    wait_reconnect: bool,
    acked: bool,
    reply: oneshot::Sender<RelayResult<Value>>,
}

struct Link {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

struct Session {
    token: SessionToken,
    state: SessionState,
    flaws: Flaws,
    next_id: MessageId,
    link: Option<Link>,
    pending: HashMap<MessageId, PendingCall>,
    /// Sent but unacknowledged frames, resent in id order after a resume.
    outbox: BTreeMap<MessageId, String>,
    /// Exec urls redelivered on every resume, in registration order.
    persistent: Vec<String>,
    runner_error: Option<RelayError>,
    reconnects: u32,
}

impl Session {
    fn new(token: SessionToken, flaws: Flaws) -> Self {
        Self {
            token,
            state: SessionState::Connecting,
            flaws,
            next_id: HANDSHAKE_ID + 1,
            link: None,
            pending: HashMap::new(),
            outbox: BTreeMap::new(),
            persistent: Vec::new(),
            runner_error: None,
            reconnects: 0,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link.as_ref().map(|link| link.generation) == Some(generation)
    }

    /// Moves frames the client has not processed above every id handed out
    /// so far. Frames it already processed keep their ids.
    fn renumber_unprocessed(&mut self, client_last: MessageId) {
        let queued = std::mem::take(&mut self.outbox);
        for (id, text) in queued {
            let fresh = match Frame::decode(&text) {
                Ok(Frame::Message { kind, payload, .. }) if id > client_last => {
                    Frame::Message {
                        id: self.next_id,
                        kind,
                        payload,
                    }
                }
                _ => {
                    self.outbox.insert(id, text);
                    continue;
                }
            };
            let renumbered = fresh.id();
            self.next_id += 1;
            if let Some(call) = self.pending.remove(&id) {
                self.pending.insert(renumbered, call);
            }
            trace!(token = %self.token, from = id, to = renumbered, "renumbered queued frame");
            self.outbox.insert(renumbered, fresh.encode());
        }
    }

    fn push_to_link(&self, text: String) -> bool {
        match &self.link {
            Some(link) => link.tx.send(text).is_ok(),
            None => false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        if let Err(err) = self.state.transition(next) {
            warn!(token = %self.token, error = %err, "ignored session transition");
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            token: self.token.clone(),
            state: self.state,
            flaws: self.flaws,
            reconnects: self.reconnects,
            pending: self.pending.len(),
            unacked: self.outbox.len(),
            persistent: self.persistent.clone(),
        }
    }
}

/// Every session of the server, keyed by token.
///
/// One logical session survives any number of physical connections. A
/// connection that presents a known token resumes that session instead of
/// creating a new one.
pub struct SessionHub {
    sessions: DashMap<SessionToken, Arc<Mutex<Session>>>,
    scripts: Arc<ScriptRegistry>,
    events: Arc<InMemoryBus<HubEvent>>,
    config: HubConfig,
    generations: AtomicU64,
    script_ids: AtomicU64,
}

impl SessionHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            scripts: Arc::new(ScriptRegistry::new(config.retain_scripts)),
            events: InMemoryBus::new(64),
            config,
            generations: AtomicU64::new(0),
            script_ids: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.scripts
    }

    pub fn events(&self) -> &Arc<InMemoryBus<HubEvent>> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn session(&self, token: &SessionToken) -> Option<SessionInfo> {
        self.sessions.get(token).map(|entry| entry.lock().info())
    }

    pub fn tokens(&self) -> Vec<SessionToken> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_current(&self, token: &SessionToken, generation: u64) -> bool {
        self.sessions
            .get(token)
            .is_some_and(|entry| entry.lock().is_current(generation))
    }

    fn entry(&self, token: &SessionToken) -> TransportResult<Arc<Mutex<Session>>> {
        self.sessions
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::NoSuchSession(token.to_string()))
    }

    /// Drives one physical connection until it closes.
    ///
    /// The first frame must be the `connect` handshake; anything else drops
    /// the connection.
    pub async fn serve_link(self: &Arc<Self>, link: LinkEnd) {
        let LinkEnd { tx, mut rx } = link;
        let Some(first) = rx.recv().await else {
            return;
        };
        let connect = match parse_connect(&first) {
            Ok(connect) => connect,
            Err(err) => {
                warn!(error = %err, "rejecting connection");
                return;
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let carried_reply = connect.reply.clone();
        let client_last = connect.last;
        let (token, resumed) = match self.attach(connect, generation, tx) {
            Ok(attached) => attached,
            Err(err) => {
                warn!(error = %err, "handshake failed");
                return;
            }
        };

        let flaws = self.session(&token).map(|info| info.flaws).unwrap_or_default();
        self.events
            .publish(HubEvent::Connected {
                token: token.clone(),
                flaws,
                resumed,
            })
            .await;

        if resumed {
            let hub = self.clone();
            let resumed_token = token.clone();
            tokio::spawn(async move {
                hub.resume(resumed_token, generation, client_last, carried_reply)
                    .await;
            });
        }

        while let Some(text) = rx.recv().await {
            if !self.is_current(&token, generation) {
                debug!(token = %token, generation, "ignoring frames from an evicted connection");
                break;
            }
            self.handle_inbound(&token, &text);
        }
        self.detach(&token, generation).await;
    }

    /// Binds a connection to a new or existing session and answers `ready`.
    fn attach(
        &self,
        connect: ConnectPayload,
        generation: u64,
        tx: mpsc::UnboundedSender<String>,
    ) -> TransportResult<(SessionToken, bool)> {
        let known = connect
            .token
            .as_ref()
            .and_then(|token| self.sessions.get(token).map(|entry| Arc::clone(entry.value())));

        if let Some(session) = known {
            let mut s = session.lock();
            if s.state.is_live() {
                if s.link.is_some() {
                    debug!(token = %s.token, "evicting previous connection");
                }
                s.link = Some(Link { generation, tx });
                if s.state != SessionState::Reconnecting {
                    s.transition(SessionState::Reconnecting);
                }
                s.flaws = connect.flaws;
                s.reconnects += 1;
                metrics::record_reconnect();
                let ready = Frame::message(
                    HANDSHAKE_ID,
                    MessageKind::Ready,
                    ReadyPayload {
                        token: s.token.clone(),
                        resumed: true,
                    },
                )?;
                s.push_to_link(ready.encode());
                info!(token = %s.token, reconnects = s.reconnects, "session resumed");
                return Ok((s.token.clone(), true));
            }
        }

        // A well-formed token nobody owns is adopted; a clash with a
        // session that is shutting down gets a fresh one.
        let token = connect
            .token
            .filter(|token| !self.sessions.contains_key(token))
            .unwrap_or_else(|| self.mint_token());
        let mut session = Session::new(token.clone(), connect.flaws);
        session.link = Some(Link { generation, tx });
        session.transition(SessionState::Ready);
        let ready = Frame::message(
            HANDSHAKE_ID,
            MessageKind::Ready,
            ReadyPayload {
                token: token.clone(),
                resumed: false,
            },
        )?;
        session.push_to_link(ready.encode());
        self.sessions
            .insert(token.clone(), Arc::new(Mutex::new(session)));
        metrics::set_session_count(self.sessions.len());
        info!(token = %token, flaws = ?connect.flaws, "session connected");
        Ok((token, false))
    }

    fn mint_token(&self) -> SessionToken {
        loop {
            let token = SessionToken::mint();
            if !self.sessions.contains_key(&token) {
                return token;
            }
        }
    }

    /// Replays what a dropped connection left unfinished.
    ///
    /// Order: the client's carried reply, rejection of answered-by-nobody
    /// calls, persistent scripts one by one, then `Ready`, the outbox, and
    /// finally the calls that were waiting for this reconnect. A carried
    /// reply to one of those waiting calls settles it in that last step.
    ///
    /// Redelivered scripts take fresh ids, so whatever the client has not
    /// processed yet is renumbered after them; the client skips any id at
    /// or below the highest one it has run.
    #[instrument(skip(self, carried_reply), fields(token = %token))]
    async fn resume(
        self: Arc<Self>,
        token: SessionToken,
        generation: u64,
        client_last: MessageId,
        carried_reply: Option<Value>,
    ) {
        let Ok(session) = self.entry(&token) else {
            return;
        };

        // A reply to a call waiting for this reconnect is held until the
        // persistent scripts have run.
        let mut held = None;
        if let Some(frame) = carried_reply.and_then(|value| Frame::from_value(value).ok()) {
            let waiting = session
                .lock()
                .pending
                .get(&frame.id())
                .is_some_and(|call| call.wait_reconnect && call.acked);
            if waiting {
                held = Some(frame);
            } else {
                self.resolve_reply(&token, frame);
            }
        }
        let (stale, scripts) = {
            let mut s = session.lock();
            let stale_ids: Vec<MessageId> = s
                .pending
                .iter()
                .filter(|(_, call)| call.acked && !call.wait_reconnect)
                .map(|(id, _)| *id)
                .collect();
            let stale: Vec<(MessageId, PendingCall)> = stale_ids
                .into_iter()
                .filter_map(|id| s.pending.remove(&id).map(|call| (id, call)))
                .collect();
            (stale, s.persistent.clone())
        };
        for (id, call) in stale {
            debug!(id, kind = %call.kind, "rejecting call lost with the previous page");
            let _ = call.reply.send(Err(RelayError::Transport(format!(
                "connection lost before {} {id} was answered",
                call.kind
            ))));
        }

        let redelivered = !scripts.is_empty();
        for url in scripts {
            let outcome = self
                .send_call(&token, MessageKind::Exec, ExecPayload { url: url.clone() }, false, true)
                .await;
            if let Err(err) = outcome {
                warn!(url = %url, error = %err, "persistent script failed on redelivery");
            }
        }

        let waiters = {
            let mut s = session.lock();
            if !s.is_current(generation) || s.state != SessionState::Reconnecting {
                debug!("connection changed during resume");
                return;
            }
            s.transition(SessionState::Ready);
            if redelivered {
                s.renumber_unprocessed(client_last);
            }
            let frames: Vec<String> = s.outbox.values().cloned().collect();
            metrics::record_resent(frames.len());
            for frame in frames {
                s.push_to_link(frame);
            }
            let waiting: Vec<MessageId> = s
                .pending
                .iter()
                .filter(|(_, call)| call.wait_reconnect && call.acked)
                .map(|(id, _)| *id)
                .collect();
            waiting
                .into_iter()
                .filter_map(|id| s.pending.remove(&id).map(|call| (id, call)))
                .collect::<Vec<_>>()
        };
        let held_id = held.as_ref().map(Frame::id);
        let mut held_outcome = held.and_then(Frame::into_outcome);
        for (id, waiter) in waiters {
            let outcome = match held_outcome.take() {
                Some(outcome) if Some(id) == held_id => outcome,
                other => {
                    held_outcome = other;
                    Ok(Value::Null)
                }
            };
            metrics::record_call(waiter.kind.as_str(), outcome.is_ok());
            let _ = waiter.reply.send(outcome);
        }
    }

    fn handle_inbound(&self, token: &SessionToken, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(token = %token, error = %err, "dropping inbound frame");
                return;
            }
        };
        match frame {
            Frame::Message {
                id,
                kind: MessageKind::Ack,
                ..
            } => {
                if let Ok(session) = self.entry(token) {
                    let mut s = session.lock();
                    s.outbox.remove(&id);
                    if let Some(call) = s.pending.get_mut(&id) {
                        call.acked = true;
                    }
                }
                trace!(token = %token, id, "ack");
            }
            Frame::Message { id, kind, payload } => {
                self.acknowledge(token, id);
                match kind {
                    MessageKind::Log => match serde_json::from_value::<LogPayload>(payload) {
                        Ok(line) => info!(
                            target: "crossrun::console",
                            token = %token,
                            level = %line.level,
                            "{}",
                            line.message
                        ),
                        Err(err) => warn!(token = %token, error = %err, "malformed log payload"),
                    },
                    other => warn!(token = %token, kind = %other, "unexpected message from client"),
                }
            }
            reply @ Frame::Reply { .. } => self.resolve_reply(token, reply),
        }
    }

    fn acknowledge(&self, token: &SessionToken, id: MessageId) {
        if id == HANDSHAKE_ID {
            return;
        }
        if let Ok(session) = self.entry(token) {
            session.lock().push_to_link(Frame::ack(id).encode());
        }
    }

    fn resolve_reply(&self, token: &SessionToken, frame: Frame) {
        let id = frame.id();
        let Ok(session) = self.entry(token) else {
            return;
        };
        let call = {
            let mut s = session.lock();
            s.outbox.remove(&id);
            s.pending.remove(&id)
        };
        let Some(call) = call else {
            debug!(token = %token, id, "reply for a call nobody is waiting on");
            return;
        };
        if let Some(outcome) = frame.into_outcome() {
            metrics::record_call(call.kind.as_str(), outcome.is_ok());
            let _ = call.reply.send(outcome);
        }
    }

    async fn detach(&self, token: &SessionToken, generation: u64) {
        let Ok(session) = self.entry(token) else {
            return;
        };
        let dropped = {
            let mut s = session.lock();
            if !s.is_current(generation) {
                return;
            }
            s.link = None;
            if matches!(s.state, SessionState::Ready | SessionState::Reconnecting) {
                s.transition(SessionState::Disconnected);
                true
            } else {
                false
            }
        };
        if dropped {
            info!(token = %token, "session disconnected");
            self.events
                .publish(HubEvent::Disconnected {
                    token: token.clone(),
                })
                .await;
        }
    }

    /// Queues an id-bearing message and waits for its reply. `direct` sends
    /// it even while the session is not `Ready`.
    async fn send_call(
        &self,
        token: &SessionToken,
        kind: MessageKind,
        payload: impl Serialize,
        wait_reconnect: bool,
        direct: bool,
    ) -> RelayResult<Value> {
        let session = self.entry(token)?;
        let (id, rx) = {
            let mut s = session.lock();
            if s.state == SessionState::Closed {
                return Err(TransportError::Closed(token.to_string()).into());
            }
            let id = s.next_id;
            s.next_id += 1;
            let text = Frame::message(id, kind, payload)?.encode();
            let (tx, rx) = oneshot::channel();
            s.pending.insert(
                id,
                PendingCall {
                    kind,
                    wait_reconnect,
                    acked: false,
                    reply: tx,
                },
            );
            s.outbox.insert(id, text.clone());
            if direct || s.state.sends_directly() {
                s.push_to_link(text);
            }
            (id, rx)
        };
        trace!(token = %token, id, kind = %kind, "call sent");
        rx.await.unwrap_or_else(|_| {
            Err(RelayError::Transport(format!(
                "session {token} dropped {kind} {id}"
            )))
        })
    }

    /// Fire-and-forget: the frame stays in the outbox until acknowledged.
    fn notify(&self, token: &SessionToken, kind: MessageKind, payload: impl Serialize) -> RelayResult<()> {
        let session = self.entry(token)?;
        let mut s = session.lock();
        let id = s.next_id;
        s.next_id += 1;
        let text = Frame::message(id, kind, payload)?.encode();
        s.outbox.insert(id, text.clone());
        if s.state.sends_directly() {
            s.push_to_link(text);
        }
        Ok(())
    }

    /// Any id-bearing request/response exchange.
    pub async fn call(
        &self,
        token: &SessionToken,
        kind: MessageKind,
        payload: Value,
        wait_reconnect: bool,
    ) -> RelayResult<Value> {
        self.send_call(token, kind, payload, wait_reconnect, false).await
    }

    #[instrument(skip(self, call), fields(token = %call.token, tool = %call.path))]
    pub async fn tool(&self, call: ToolCall) -> RelayResult<Value> {
        let payload = ToolPayload {
            path: call.path,
            args: call.args,
            reconnect: call.wait_reconnect,
        };
        self.send_call(&call.token, MessageKind::Tool, payload, call.wait_reconnect, false)
            .await
    }

    /// Registers `source` under a fresh exec url and has the client run it.
    /// Persistent scripts run again after every reconnect.
    pub async fn exec(
        &self,
        token: &SessionToken,
        source: impl Into<String>,
        args: Vec<Value>,
        persistent: bool,
    ) -> RelayResult<Value> {
        let session = self.entry(token)?;
        let script_id = self.script_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let url = self.scripts.insert(token, script_id, source, args, persistent);
        if persistent {
            session.lock().persistent.push(url.clone());
        }
        self.send_call(token, MessageKind::Exec, ExecPayload { url }, false, false)
            .await
    }

    pub fn log(&self, token: &SessionToken, level: &str, message: &str) -> RelayResult<()> {
        self.notify(
            token,
            MessageKind::Log,
            LogPayload {
                level: level.to_string(),
                message: message.to_string(),
            },
        )
    }

    pub async fn coverage(&self, token: &SessionToken) -> RelayResult<Value> {
        self.call(token, MessageKind::Coverage, Value::Null, false).await
    }

    /// Keeps the first failure reported for the session's runner.
    pub fn record_failure(&self, token: &SessionToken, error: RelayError) {
        if let Ok(session) = self.entry(token) {
            let mut s = session.lock();
            if s.runner_error.is_none() {
                s.runner_error = Some(error);
            }
        }
    }

    /// Ends a session: coverage when asked, then `end` raced against the
    /// ceiling, then teardown. Never fails; problems land in the outcome.
    #[instrument(skip(self, options), fields(token = %token))]
    pub async fn finish(&self, token: &SessionToken, options: FinishOptions) -> FinishOutcome {
        let ceiling = self.config.end_timeout;
        let recorded = match self.entry(token) {
            Ok(session) => {
                let mut s = session.lock();
                s.transition(SessionState::Finishing);
                s.runner_error.take()
            }
            Err(err) => {
                return FinishOutcome {
                    coverage: None,
                    error: options.runner_error.or(Some(err.into())),
                }
            }
        };

        let mut teardown_error: Option<RelayError> = None;
        let mut coverage = None;
        if options.collect_coverage {
            let request = self.send_call(token, MessageKind::Coverage, Value::Null, false, true);
            match timeout(ceiling, request).await {
                Ok(Ok(map)) => coverage = Some(map),
                Ok(Err(err)) => {
                    warn!(error = %err, "coverage request failed");
                    teardown_error = Some(err);
                }
                Err(_) => {
                    warn!("coverage request timed out");
                    teardown_error = Some(RelayError::Timeout(format!(
                        "coverage request exceeded {}ms",
                        ceiling.as_millis()
                    )));
                }
            }
        }

        let end = self.send_call(token, MessageKind::End, Value::Null, false, true);
        match timeout(ceiling, end).await {
            Ok(Ok(_)) => debug!("end acknowledged"),
            Ok(Err(err)) => {
                warn!(error = %err, "end request failed");
                teardown_error = teardown_error.or(Some(err));
            }
            Err(_) => {
                metrics::record_end_timeout();
                warn!(ceiling_ms = ceiling.as_millis() as u64, "end handshake timed out");
                teardown_error = teardown_error.or(Some(RelayError::Timeout(format!(
                    "end handshake exceeded {}ms",
                    ceiling.as_millis()
                ))));
            }
        }

        self.teardown(token);
        let error = options.runner_error.or(recorded).or(teardown_error);
        self.events
            .publish(HubEvent::Finished {
                token: token.clone(),
                error: error.as_ref().map(RelayError::to_descriptor),
            })
            .await;
        FinishOutcome { coverage, error }
    }

    fn teardown(&self, token: &SessionToken) {
        if let Some((_, session)) = self.sessions.remove(token) {
            let mut s = session.lock();
            let id = s.next_id;
            s.next_id += 1;
            if let Ok(frame) = Frame::message(id, MessageKind::Finish, Value::Null) {
                s.push_to_link(frame.encode());
            }
            s.link = None;
            for (id, call) in s.pending.drain() {
                let _ = call.reply.send(Err(RelayError::Transport(format!(
                    "session {token} finished before {} {id} was answered",
                    call.kind
                ))));
            }
            s.outbox.clear();
            s.transition(SessionState::Closed);
        }
        let purged = self.scripts.purge(token);
        metrics::set_session_count(self.sessions.len());
        info!(token = %token, purged, "session closed");
    }
}

#[async_trait]
impl RemoteInvoker for SessionHub {
    async fn invoke(&self, call: ToolCall) -> RelayResult<Value> {
        self.tool(call).await
    }
}

fn parse_connect(text: &str) -> TransportResult<ConnectPayload> {
    match Frame::decode(text)? {
        Frame::Message {
            id: HANDSHAKE_ID,
            kind: MessageKind::Connect,
            payload,
        } => serde_json::from_value(payload)
            .map_err(|err| TransportError::Handshake(format!("bad connect payload: {err}"))),
        other => Err(TransportError::Handshake(format!(
            "expected [0, \"connect\", ...], got {}",
            other.to_value()
        ))),
    }
}
