use axum::http::StatusCode;
use axum::response::IntoResponse;
use crossrun_core_types::{MessageId, RelayError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("no session for token {0}")]
    NoSuchSession(String),
    #[error("no script {id} for session {token}")]
    NoSuchScript { token: String, id: MessageId },
    #[error("session {0} is closed")]
    Closed(String),
    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransportError::Malformed(_) | TransportError::Handshake(_) => StatusCode::BAD_REQUEST,
            TransportError::NoSuchSession(_) | TransportError::NoSuchScript { .. } => {
                StatusCode::NOT_FOUND
            }
            TransportError::Closed(_) => StatusCode::GONE,
            TransportError::InvalidTransition { .. } => StatusCode::CONFLICT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Malformed(_) => "malformed_frame",
            TransportError::Handshake(_) => "handshake_failed",
            TransportError::NoSuchSession(_) => "no_such_session",
            TransportError::NoSuchScript { .. } => "no_such_script",
            TransportError::Closed(_) => "session_closed",
            TransportError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}
