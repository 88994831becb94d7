use crate::errors::{TransportError, TransportResult};

/// Lifecycle of one logical session across physical connections.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SessionState {
    Connecting,
    Ready,
    Disconnected,
    Reconnecting,
    Finishing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Finishing => "finishing",
            SessionState::Closed => "closed",
        }
    }

    /// `Ready -> Reconnecting` is an eviction: a new connection presented a
    /// token whose old connection had not dropped yet.
    pub fn can_transition(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Ready)
                | (Connecting, Closed)
                | (Ready, Disconnected)
                | (Ready, Reconnecting)
                | (Ready, Finishing)
                | (Disconnected, Reconnecting)
                | (Disconnected, Finishing)
                | (Reconnecting, Ready)
                | (Reconnecting, Disconnected)
                | (Reconnecting, Finishing)
                | (Finishing, Closed)
        )
    }

    pub fn transition(&mut self, next: SessionState) -> TransportResult<()> {
        if !self.can_transition(next) {
            return Err(TransportError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Outgoing messages go straight onto the link only in `Ready`;
    /// otherwise they wait in the outbox.
    pub fn sends_directly(&self) -> bool {
        *self == SessionState::Ready
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Finishing | SessionState::Closed)
    }
}
