//! What the client keeps in session storage so a new page can pick up
//! where the old one stopped.

use crossrun_core_types::{Flaws, MessageId, SessionToken};
use crossrun_dom::{Capabilities, Document};
use serde_json::Value;
use tracing::warn;

pub const TOKEN_KEY: &str = "crossrun.token";
pub const LAST_KEY: &str = "crossrun.last";
pub const REPLY_KEY: &str = "crossrun.reply";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Memo {
    pub token: Option<SessionToken>,
    /// Highest message id already executed.
    pub last: MessageId,
    /// Last reply frame, carried into the next handshake.
    pub reply: Option<Value>,
}

impl Memo {
    pub fn read(doc: &Document) -> Self {
        let session = &doc.storage.session;
        let token = session.get(TOKEN_KEY).and_then(|raw| match raw.parse() {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "ignoring stored token");
                None
            }
        });
        let last = session
            .get(LAST_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        let reply = session
            .get(REPLY_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self { token, last, reply }
    }

    pub fn write(&self, doc: &mut Document) {
        let session = &mut doc.storage.session;
        match &self.token {
            Some(token) => session.insert(TOKEN_KEY.into(), token.to_string()),
            None => session.remove(TOKEN_KEY),
        };
        session.insert(LAST_KEY.into(), self.last.to_string());
        match &self.reply {
            Some(reply) => session.insert(REPLY_KEY.into(), reply.to_string()),
            None => session.remove(REPLY_KEY),
        };
    }
}

pub fn store_token(doc: &mut Document, token: &SessionToken) {
    doc.storage
        .session
        .insert(TOKEN_KEY.into(), token.to_string());
}

pub fn store_last(doc: &mut Document, id: MessageId) {
    doc.storage.session.insert(LAST_KEY.into(), id.to_string());
}

pub fn store_reply(doc: &mut Document, reply: &Value) {
    doc.storage
        .session
        .insert(REPLY_KEY.into(), reply.to_string());
}

/// Capability gaps reported on connect.
pub fn flaws(capabilities: &Capabilities) -> Flaws {
    Flaws {
        selectors_api: !capabilities.selectors_api,
        history_api: !capabilities.history_api,
        input_event: !capabilities.input_event,
        indexed_db_enumeration: !capabilities.indexed_db_enumeration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memo_survives_a_write_read_cycle() {
        let mut doc = Document::new("http://localhost/");
        let memo = Memo {
            token: Some("a1b2".parse().unwrap()),
            last: 7,
            reply: Some(json!([7, [null, null]])),
        };
        memo.write(&mut doc);
        assert_eq!(Memo::read(&doc), memo);
    }

    #[test]
    fn garbage_in_storage_reads_as_empty() {
        let mut doc = Document::new("http://localhost/");
        doc.storage.session.insert(TOKEN_KEY.into(), "not a token".into());
        doc.storage.session.insert(LAST_KEY.into(), "x".into());
        assert_eq!(Memo::read(&doc), Memo::default());
    }

    #[test]
    fn missing_capabilities_become_flaws() {
        let caps = Capabilities {
            input_event: false,
            ..Capabilities::default()
        };
        let flaws = flaws(&caps);
        assert!(flaws.input_event);
        assert!(!flaws.selectors_api);
    }
}
