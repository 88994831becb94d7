use crossrun_core_types::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not reach the server: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("page load failed for {url}: {reason}")]
    Load { url: String, reason: String },

    #[error("no script named {0:?}")]
    UnknownScript(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<ClientError> for RelayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::UnknownScript(_) => RelayError::NotFound(err.to_string()),
            ClientError::Load { .. } => RelayError::NotFound(err.to_string()),
            ClientError::Connect(_) | ClientError::Handshake(_) => {
                RelayError::Transport(err.to_string())
            }
        }
    }
}
