use std::fmt;
use std::str::FromStr;

use crossrun_core_types::RelayError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Client,
    Input,
    Query,
    Hooks,
    Runner,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Client => "client",
            Namespace::Input => "input",
            Namespace::Query => "query",
            Namespace::Hooks => "hooks",
            Namespace::Runner => "runner",
        }
    }
}

/// Every command the catalog knows out of the box.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CommandId {
    ClientNavigate,
    ClientReload,
    ClientReset,
    InputClick,
    InputDblclick,
    InputHover,
    InputType,
    InputPaste,
    InputClear,
    QueryFind,
    QueryIs,
    QueryNot,
    QueryValue,
    HooksReady,
    HooksClear,
    HooksSkip,
    RunnerDelay,
    RunnerUntil,
    RunnerWhile,
}

impl CommandId {
    pub const ALL: [CommandId; 19] = [
        CommandId::ClientNavigate,
        CommandId::ClientReload,
        CommandId::ClientReset,
        CommandId::InputClick,
        CommandId::InputDblclick,
        CommandId::InputHover,
        CommandId::InputType,
        CommandId::InputPaste,
        CommandId::InputClear,
        CommandId::QueryFind,
        CommandId::QueryIs,
        CommandId::QueryNot,
        CommandId::QueryValue,
        CommandId::HooksReady,
        CommandId::HooksClear,
        CommandId::HooksSkip,
        CommandId::RunnerDelay,
        CommandId::RunnerUntil,
        CommandId::RunnerWhile,
    ];

    pub fn namespace(&self) -> Namespace {
        use CommandId::*;
        match self {
            ClientNavigate | ClientReload | ClientReset => Namespace::Client,
            InputClick | InputDblclick | InputHover | InputType | InputPaste | InputClear => {
                Namespace::Input
            }
            QueryFind | QueryIs | QueryNot | QueryValue => Namespace::Query,
            HooksReady | HooksClear | HooksSkip => Namespace::Hooks,
            RunnerDelay | RunnerUntil | RunnerWhile => Namespace::Runner,
        }
    }

    pub fn path(&self) -> &'static str {
        use CommandId::*;
        match self {
            ClientNavigate => "client.navigate",
            ClientReload => "client.reload",
            ClientReset => "client.reset",
            InputClick => "input.click",
            InputDblclick => "input.dblclick",
            InputHover => "input.hover",
            InputType => "input.type",
            InputPaste => "input.paste",
            InputClear => "input.clear",
            QueryFind => "query.find",
            QueryIs => "query.is",
            QueryNot => "query.not",
            QueryValue => "query.value",
            HooksReady => "hooks.ready",
            HooksClear => "hooks.clear",
            HooksSkip => "hooks.skip",
            RunnerDelay => "runner.delay",
            RunnerUntil => "runner.until",
            RunnerWhile => "runner.while",
        }
    }

    /// Commands whose answer can only come from the page loaded afterwards.
    pub fn waits_for_reconnect(&self) -> bool {
        matches!(
            self,
            CommandId::ClientNavigate | CommandId::ClientReload | CommandId::ClientReset
        )
    }

    /// Runner commands execute on the server; everything else goes to the client.
    pub fn is_local(&self) -> bool {
        self.namespace() == Namespace::Runner
    }
}

impl FromStr for CommandId {
    type Err = RelayError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        CommandId::ALL
            .iter()
            .copied()
            .find(|id| id.path() == raw)
            .ok_or_else(|| RelayError::NotFound(format!("unknown tool {raw:?}")))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
