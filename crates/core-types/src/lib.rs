//! Shared primitives for the crossrun relay: session identity, tool paths,
//! the `Thing` reference type and the error taxonomy carried on the wire.

pub mod errors;
pub mod thing;

use std::fmt;
use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use errors::{trim_stack, ErrorDescriptor, RelayError, RelayResult};
pub use thing::{Deferred, Pattern, TextValue, Thing, ThingArg, ThingKind};

/// Correlation id for one id-bearing message within a session.
pub type MessageId = u64;

/// Id reserved for the handshake and unacknowledged notifications.
pub const HANDSHAKE_ID: MessageId = 0;

const TOKEN_LEN: usize = 4;

/// Opaque session token minted on first connect and presented on reconnect.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    pub fn mint() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionToken {
    type Err = RelayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() == TOKEN_LEN && raw.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(RelayError::Transport(format!("malformed session token {raw:?}")))
        }
    }
}

impl TryFrom<String> for SessionToken {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability gaps a client reports when it connects.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Flaws {
    pub selectors_api: bool,
    pub history_api: bool,
    pub input_event: bool,
    pub indexed_db_enumeration: bool,
}

impl Flaws {
    pub fn any(&self) -> bool {
        self.selectors_api || self.history_api || self.input_event || self.indexed_db_enumeration
    }
}

/// Dotted command path. A path without a dot lives in the root namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ToolPath {
    space: Option<String>,
    name: String,
}

impl ToolPath {
    pub fn space(&self) -> Option<&str> {
        self.space.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook keys consulted for this path, outermost first.
    pub fn hook_keys(&self, stage: &str) -> Vec<String> {
        let mut keys = vec![format!("{stage}.tool")];
        if let Some(space) = &self.space {
            keys.push(format!("{stage}.{space}"));
        }
        keys.push(format!("{stage}.{self}"));
        keys
    }
}

impl FromStr for ToolPath {
    type Err = RelayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        match raw.split_once('.') {
            Some((space, name)) if !space.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self {
                    space: Some(space.to_string()),
                    name: name.to_string(),
                })
            }
            None if !raw.is_empty() => Ok(Self {
                space: None,
                name: raw.to_string(),
            }),
            _ => Err(RelayError::NotFound(format!("invalid tool path {raw:?}"))),
        }
    }
}

impl fmt::Display for ToolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.space {
            Some(space) => write!(f, "{space}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_four_alphanumerics() {
        let token = SessionToken::mint();
        assert_eq!(token.as_str().len(), 4);
        assert!(token.as_str().parse::<SessionToken>().is_ok());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!("a1b".parse::<SessionToken>().is_err());
        assert!("a1b2c".parse::<SessionToken>().is_err());
        assert!("a-b2".parse::<SessionToken>().is_err());
        let token: SessionToken = serde_json::from_str("\"a1b2\"").unwrap();
        assert_eq!(token.to_string(), "a1b2");
    }

    #[test]
    fn tool_path_hook_keys() {
        let path: ToolPath = "input.click".parse().unwrap();
        assert_eq!(path.space(), Some("input"));
        assert_eq!(
            path.hook_keys("before"),
            vec!["before.tool", "before.input", "before.input.click"]
        );

        let root: ToolPath = "ping".parse().unwrap();
        assert_eq!(root.space(), None);
        assert_eq!(root.hook_keys("after"), vec!["after.tool", "after.ping"]);

        assert!("".parse::<ToolPath>().is_err());
        assert!("a.b.c".parse::<ToolPath>().is_err());
    }
}
