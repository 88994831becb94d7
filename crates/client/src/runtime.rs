use std::sync::Arc;

use crossrun_actions::{ActionEngine, Cadence, HumanCadence};
use crossrun_catalog::CommandId;
use crossrun_core_types::{MessageId, RelayError, RelayResult, ToolPath, HANDSHAKE_ID};
use crossrun_dom::{shared, Document, Navigation};
use crossrun_hooks::Stage;
use crossrun_transport::{
    ConnectPayload, ExecPayload, Frame, LinkEnd, LogPayload, MessageKind, ReadyPayload,
    SessionHub, ToolPayload,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::context::{ClientContext, ScriptHost};
use crate::errors::ClientError;
use crate::memo::{self, Memo};
use crate::seams::{Connector, HubConnector, PageLoader, PageSet, RegistryFetcher, ScriptFetcher};
use crate::tools::run_tool;

/// How a run ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub connections: u32,
    pub navigations: u32,
    /// The server sent `finish`; otherwise the connection just closed.
    pub finished: bool,
}

/// A wait-for-reconnect call whose after-hooks run on the next page.
struct DeferredCall {
    id: MessageId,
    path: ToolPath,
    args: Vec<Value>,
    result: Value,
}

enum Served {
    Navigate {
        navigation: Navigation,
        deferred: Option<DeferredCall>,
    },
    Finished,
    Closed,
}

pub struct ClientBuilder {
    doc: Document,
    cadence: Arc<dyn Cadence>,
    scripts: ScriptHost,
    loader: Arc<dyn PageLoader>,
    connector: Option<Arc<dyn Connector>>,
    fetcher: Option<Arc<dyn ScriptFetcher>>,
}

impl ClientBuilder {
    pub fn new(doc: Document) -> Self {
        Self {
            doc,
            cadence: Arc::new(HumanCadence),
            scripts: ScriptHost::new(),
            loader: Arc::new(PageSet::new()),
            connector: None,
            fetcher: None,
        }
    }

    /// Connects into `hub` and fetches exec scripts from its registry.
    pub fn hub(mut self, hub: &Arc<SessionHub>) -> Self {
        self.connector = Some(Arc::new(HubConnector::new(hub.clone())));
        self.fetcher = Some(Arc::new(RegistryFetcher::new(hub.scripts().clone())));
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn cadence(mut self, cadence: Arc<dyn Cadence>) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn scripts(mut self, scripts: ScriptHost) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn PageLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn build(self) -> RelayResult<ClientRuntime> {
        let connector = self
            .connector
            .ok_or_else(|| ClientError::Connect("no connector configured".into()))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| ClientError::Connect("no script fetcher configured".into()))?;
        let ctx = ClientContext::new(
            shared(self.doc),
            ActionEngine::new(self.cadence),
            self.scripts,
            fetcher,
            self.loader,
        );
        Ok(ClientRuntime { ctx, connector })
    }
}

/// The page side of a session.
///
/// Connects with whatever token session storage holds, executes each
/// message id at most once, and reconnects after every navigation until the
/// server sends `finish` or drops the connection.
pub struct ClientRuntime {
    ctx: ClientContext,
    connector: Arc<dyn Connector>,
}

impl ClientRuntime {
    pub fn builder(doc: Document) -> ClientBuilder {
        ClientBuilder::new(doc)
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub async fn run(&self) -> RelayResult<RunReport> {
        let mut report = RunReport::default();
        loop {
            let link = self.connector.connect().await?;
            report.connections += 1;
            match self.serve(link).await? {
                Served::Navigate {
                    navigation,
                    deferred,
                } => {
                    report.navigations += 1;
                    match self.load(navigation) {
                        Ok(()) => {
                            if let Some(call) = deferred {
                                self.finish_deferred(call).await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "navigation failed");
                            if let Some(call) = deferred {
                                self.remember_reply(call.id, &Err(err));
                            }
                        }
                    }
                }
                Served::Finished => {
                    report.finished = true;
                    return Ok(report);
                }
                Served::Closed => {
                    info!("server closed the connection");
                    return Ok(report);
                }
            }
        }
    }

    async fn serve(&self, link: LinkEnd) -> RelayResult<Served> {
        let LinkEnd { tx, mut rx } = link;
        let connect = {
            let doc = self.ctx.doc().lock();
            let memo = Memo::read(&doc);
            ConnectPayload {
                token: memo.token,
                flaws: memo::flaws(&doc.capabilities),
                last: memo.last,
                reply: memo.reply,
            }
        };
        send(&tx, Frame::message(HANDSHAKE_ID, MessageKind::Connect, connect)?);

        let ready = handshake(&mut rx).await?;
        {
            let mut doc = self.ctx.doc().lock();
            memo::store_token(&mut doc, &ready.token);
            // A fresh session numbers its messages from the start again.
            if !ready.resumed {
                memo::store_last(&mut doc, 0);
                doc.storage.session.remove(memo::REPLY_KEY);
            }
        }
        info!(token = %ready.token, resumed = ready.resumed, "connected");

        self.ctx.attach(tx.clone());
        let served = self.pump(&tx, &mut rx).await;
        self.ctx.detach();
        served
    }

    async fn pump(
        &self,
        tx: &mpsc::UnboundedSender<String>,
        rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> RelayResult<Served> {
        while let Some(text) = rx.recv().await {
            let (id, kind, payload) = match Frame::decode(&text) {
                Ok(Frame::Message { id, kind, payload }) => (id, kind, payload),
                Ok(Frame::Reply { id, .. }) => {
                    trace!(id, "ignoring reply");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "dropping frame");
                    continue;
                }
            };
            if matches!(
                kind,
                MessageKind::Ack | MessageKind::Ready | MessageKind::Connect
            ) {
                continue;
            }

            send(tx, Frame::ack(id));
            if !self.claim(id) {
                debug!(id, kind = %kind, "already handled");
                self.replay(tx, id);
                continue;
            }

            match kind {
                MessageKind::Tool => match serde_json::from_value::<ToolPayload>(payload) {
                    Ok(call) => {
                        if let Some(served) = self.handle_tool(tx, id, call).await {
                            return Ok(served);
                        }
                    }
                    Err(err) => self.reply(tx, id, Err(err.into())),
                },
                MessageKind::Exec => {
                    let outcome = match serde_json::from_value::<ExecPayload>(payload) {
                        Ok(exec) => self.handle_exec(&exec.url).await,
                        Err(err) => Err(err.into()),
                    };
                    self.reply(tx, id, outcome);
                    if let Some(navigation) = self.take_navigation() {
                        return Ok(Served::Navigate {
                            navigation,
                            deferred: None,
                        });
                    }
                }
                MessageKind::Coverage => self.reply(tx, id, Ok(self.ctx.coverage())),
                MessageKind::End => {
                    debug!("end requested");
                    self.reply(tx, id, Ok(Value::Null));
                }
                MessageKind::Finish => return Ok(Served::Finished),
                MessageKind::Log => match serde_json::from_value::<LogPayload>(payload) {
                    Ok(line) => self.ctx.doc().lock().log(&line.level, &line.message),
                    Err(err) => warn!(error = %err, "malformed log payload"),
                },
                MessageKind::Ack | MessageKind::Ready | MessageKind::Connect => {}
            }
        }
        Ok(Served::Closed)
    }

    /// Records `id` as executed. False when it already was.
    fn claim(&self, id: MessageId) -> bool {
        let mut doc = self.ctx.doc().lock();
        if id <= Memo::read(&doc).last {
            return false;
        }
        memo::store_last(&mut doc, id);
        true
    }

    /// Sends the stored reply again when it answers `id`.
    fn replay(&self, tx: &mpsc::UnboundedSender<String>, id: MessageId) {
        let stored = Memo::read(&self.ctx.doc().lock()).reply;
        if let Some(frame) = stored.and_then(|reply| Frame::from_value(reply).ok()) {
            if frame.id() == id {
                send(tx, frame);
            }
        }
    }

    #[instrument(skip(self, tx, call), fields(tool = %call.path))]
    async fn handle_tool(
        &self,
        tx: &mpsc::UnboundedSender<String>,
        id: MessageId,
        call: ToolPayload,
    ) -> Option<Served> {
        let (path, command) = match parse_tool(&call.path) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.reply(tx, id, Err(err));
                return None;
            }
        };
        let hooks = self.ctx.hooks();
        let before = hooks
            .run_stage(&self.ctx, &path, &call.args, Stage::Before, Value::Null)
            .await;
        let outcome = match before {
            Ok(_) => run_tool(self.ctx.clone(), command, call.args.clone()).await,
            Err(err) => Err(err),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.reply(tx, id, Err(err));
                return self.take_navigation().map(|navigation| Served::Navigate {
                    navigation,
                    deferred: None,
                });
            }
        };

        if call.reconnect {
            if let Some(navigation) = self.take_navigation() {
                debug!(id, "answer deferred to the next page");
                return Some(Served::Navigate {
                    navigation,
                    deferred: Some(DeferredCall {
                        id,
                        path,
                        args: call.args,
                        result,
                    }),
                });
            }
        }

        let outcome = hooks
            .run_stage(&self.ctx, &path, &call.args, Stage::After, result)
            .await;
        self.reply(tx, id, outcome);
        self.take_navigation().map(|navigation| Served::Navigate {
            navigation,
            deferred: None,
        })
    }

    async fn handle_exec(&self, url: &str) -> RelayResult<Value> {
        let body = self.ctx.fetcher().fetch(url).await?;
        self.ctx.run_script(&body.source, body.args).await
    }

    fn take_navigation(&self) -> Option<Navigation> {
        self.ctx.doc().lock().take_navigation()
    }

    /// Swaps the document for the page `navigation` lands on, keeping tab state.
    fn load(&self, navigation: Navigation) -> RelayResult<()> {
        let url = match navigation {
            Navigation::To(url) => url,
            Navigation::Reload => self.ctx.doc().lock().location.clone(),
        };
        let mut page = self.ctx.loader().load(&url)?;
        let mut doc = self.ctx.doc().lock();
        page.inherit_tab_state(&doc);
        *doc = page;
        info!(url = %url, "page loaded");
        Ok(())
    }

    /// Runs the after-hooks of a call that navigated, then leaves its reply
    /// for the next handshake to carry.
    async fn finish_deferred(&self, call: DeferredCall) {
        let outcome = self
            .ctx
            .hooks()
            .run_stage(&self.ctx, &call.path, &call.args, Stage::After, call.result)
            .await;
        if let Err(err) = &outcome {
            warn!(tool = %call.path, error = %err, "after-hooks failed on the new page");
        }
        self.remember_reply(call.id, &outcome);
    }

    fn remember_reply(&self, id: MessageId, outcome: &RelayResult<Value>) {
        let reply = Frame::reply(id, outcome).to_value();
        memo::store_reply(&mut self.ctx.doc().lock(), &reply);
    }

    fn reply(&self, tx: &mpsc::UnboundedSender<String>, id: MessageId, outcome: RelayResult<Value>) {
        if let Err(err) = &outcome {
            debug!(id, error = %err, name = err.name(), "replying with error");
        }
        let frame = Frame::reply(id, &outcome);
        memo::store_reply(&mut self.ctx.doc().lock(), &frame.to_value());
        send(tx, frame);
    }
}

fn parse_tool(raw: &str) -> RelayResult<(ToolPath, CommandId)> {
    let path: ToolPath = raw.parse()?;
    let command: CommandId = raw.parse()?;
    Ok((path, command))
}

fn send(tx: &mpsc::UnboundedSender<String>, frame: Frame) {
    if tx.send(frame.encode()).is_err() {
        debug!(id = frame.id(), "connection gone, frame dropped");
    }
}

async fn handshake(rx: &mut mpsc::UnboundedReceiver<String>) -> RelayResult<ReadyPayload> {
    while let Some(text) = rx.recv().await {
        match Frame::decode(&text) {
            Ok(Frame::Message {
                kind: MessageKind::Ready,
                payload,
                ..
            }) => {
                return serde_json::from_value(payload).map_err(|err| {
                    RelayError::from(ClientError::Handshake(format!("bad ready payload: {err}")))
                })
            }
            Ok(other) => warn!(frame = %other.to_value(), "frame before ready"),
            Err(err) => warn!(error = %err, "dropping frame before ready"),
        }
    }
    Err(ClientError::Handshake("connection closed before ready".into()).into())
}
