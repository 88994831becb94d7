use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use crossrun_core_types::RelayResult;
use crossrun_dom::Document;
use crossrun_transport::{memory_link, LinkEnd, ScriptBody, ScriptRegistry, SessionHub};

use crate::errors::ClientError;

/// Opens a fresh physical connection to the server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> RelayResult<LinkEnd>;
}

/// Connects straight into an in-process hub.
#[derive(Clone)]
pub struct HubConnector {
    hub: Arc<SessionHub>,
}

impl HubConnector {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Connector for HubConnector {
    async fn connect(&self) -> RelayResult<LinkEnd> {
        let (server, client) = memory_link();
        let hub = self.hub.clone();
        tokio::spawn(async move { hub.serve_link(server).await });
        Ok(client)
    }
}

/// Retrieves the body behind an exec url.
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> RelayResult<ScriptBody>;
}

#[derive(Clone)]
pub struct RegistryFetcher {
    scripts: Arc<ScriptRegistry>,
}

impl RegistryFetcher {
    pub fn new(scripts: Arc<ScriptRegistry>) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl ScriptFetcher for RegistryFetcher {
    async fn fetch(&self, url: &str) -> RelayResult<ScriptBody> {
        Ok(self.scripts.fetch_url(url)?)
    }
}

pub type PageFn = Arc<dyn Fn(&str) -> Document + Send + Sync>;

/// Produces the document a navigation lands on.
pub trait PageLoader: Send + Sync {
    fn load(&self, url: &str) -> RelayResult<Document>;
}

/// Pages by url. Unknown urls load blank unless `strict`.
#[derive(Clone, Default)]
pub struct PageSet {
    pages: HashMap<String, PageFn>,
    strict: bool,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn page<F>(mut self, url: impl Into<String>, build: F) -> Self
    where
        F: Fn(&str) -> Document + Send + Sync + 'static,
    {
        self.pages.insert(url.into(), Arc::new(build));
        self
    }
}

impl fmt::Debug for PageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSet")
            .field("pages", &self.pages.keys().collect::<Vec<_>>())
            .field("strict", &self.strict)
            .finish()
    }
}

impl PageLoader for PageSet {
    fn load(&self, url: &str) -> RelayResult<Document> {
        match self.pages.get(url) {
            Some(build) => Ok(build(url)),
            None if self.strict => Err(ClientError::Load {
                url: url.to_string(),
                reason: "no such page".into(),
            }
            .into()),
            None => Ok(Document::new(url)),
        }
    }
}
