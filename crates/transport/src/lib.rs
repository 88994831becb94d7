//! Session transport between the server and browser clients.
//!
//! Frames are JSON arrays: `[id, type, payload]` for messages and
//! `[id, [result, error]]` for replies. A [`SessionHub`] keeps one logical
//! session per client token across reconnects, correlates replies with
//! pending calls, resends unacknowledged frames after a resume and runs the
//! end-of-session handshake.

pub mod codec;
pub mod errors;
mod hub;
mod link;
pub mod metrics;
mod router;
mod scripts;
mod state;

pub use codec::{
    ConnectPayload, ExecPayload, Frame, LogPayload, MessageKind, ReadyPayload, ScriptBody,
    ToolPayload,
};
pub use errors::{TransportError, TransportResult};
pub use hub::{
    FinishOptions, FinishOutcome, HubConfig, HubEvent, SessionHub, SessionInfo,
    DEFAULT_END_TIMEOUT,
};
pub use link::{memory_link, LinkEnd};
pub use router::router;
pub use scripts::ScriptRegistry;
pub use state::SessionState;
