use crossrun_core_types::{MessageId, SessionToken};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::codec::ScriptBody;
use crate::errors::{TransportError, TransportResult};

#[derive(Clone, Debug)]
struct PendingScript {
    body: ScriptBody,
    persistent: bool,
}

/// Exec scripts waiting to be fetched, keyed by session token and script id.
///
/// Shared by every session; the token in the key keeps sessions apart.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: DashMap<(SessionToken, MessageId), PendingScript>,
    retain: bool,
}

impl ScriptRegistry {
    /// With `retain`, delivered scripts stay fetchable for debugging.
    pub fn new(retain: bool) -> Self {
        Self {
            scripts: DashMap::new(),
            retain,
        }
    }

    pub fn url(token: &SessionToken, id: MessageId) -> String {
        format!("/exec/{token}/{id}")
    }

    /// Parses `/exec/{token}/{id}` back into its key.
    pub fn parse_url(url: &str) -> TransportResult<(SessionToken, MessageId)> {
        let malformed = || TransportError::Malformed(format!("not an exec url: {url}"));
        let rest = url.trim_start_matches('/').strip_prefix("exec/").ok_or_else(malformed)?;
        let (token, id) = rest.split_once('/').ok_or_else(malformed)?;
        let token = token.parse().map_err(|_| malformed())?;
        let id = id.parse().map_err(|_| malformed())?;
        Ok((token, id))
    }

    pub fn insert(
        &self,
        token: &SessionToken,
        id: MessageId,
        source: impl Into<String>,
        args: Vec<Value>,
        persistent: bool,
    ) -> String {
        self.scripts.insert(
            (token.clone(), id),
            PendingScript {
                body: ScriptBody {
                    source: source.into(),
                    args,
                },
                persistent,
            },
        );
        Self::url(token, id)
    }

    /// Hands out a script. One-shot scripts are gone afterwards.
    pub fn fetch(&self, token: &SessionToken, id: MessageId) -> TransportResult<ScriptBody> {
        let key = (token.clone(), id);
        let missing = || TransportError::NoSuchScript {
            token: token.to_string(),
            id,
        };
        let keep = {
            let entry = self.scripts.get(&key).ok_or_else(missing)?;
            entry.persistent || self.retain
        };
        if keep {
            return self
                .scripts
                .get(&key)
                .map(|entry| entry.body.clone())
                .ok_or_else(missing);
        }
        let (_, script) = self.scripts.remove(&key).ok_or_else(missing)?;
        debug!(token = %token, id, "exec script delivered and dropped");
        Ok(script.body)
    }

    pub fn fetch_url(&self, url: &str) -> TransportResult<ScriptBody> {
        let (token, id) = Self::parse_url(url)?;
        self.fetch(&token, id)
    }

    /// Drops everything a finished session left behind.
    pub fn purge(&self, token: &SessionToken) -> usize {
        let before = self.scripts.len();
        self.scripts.retain(|(owner, _), _| owner != token);
        before - self.scripts.len()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
