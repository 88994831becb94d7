use std::fmt;

use crossrun_core_types::{ErrorDescriptor, Flaws, MessageId, RelayError, RelayResult, SessionToken};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{TransportError, TransportResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Tool,
    Exec,
    Log,
    Coverage,
    Connect,
    Ready,
    Finish,
    End,
    Ack,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Tool => "tool",
            MessageKind::Exec => "exec",
            MessageKind::Log => "log",
            MessageKind::Coverage => "coverage",
            MessageKind::Connect => "connect",
            MessageKind::Ready => "ready",
            MessageKind::Finish => "finish",
            MessageKind::End => "end",
            MessageKind::Ack => "ack",
        }
    }

    /// Kinds answered with a `[result, error]` reply.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            MessageKind::Tool | MessageKind::Exec | MessageKind::Coverage | MessageKind::End
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame on the wire.
///
/// Messages are `[id, type, payload]`; replies are `[id, [result, error]]`.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Message {
        id: MessageId,
        kind: MessageKind,
        payload: Value,
    },
    Reply {
        id: MessageId,
        result: Value,
        error: Option<ErrorDescriptor>,
    },
}

impl Frame {
    pub fn message(id: MessageId, kind: MessageKind, payload: impl Serialize) -> TransportResult<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|err| TransportError::Malformed(err.to_string()))?;
        Ok(Frame::Message { id, kind, payload })
    }

    pub fn ack(id: MessageId) -> Self {
        Frame::Message {
            id,
            kind: MessageKind::Ack,
            payload: Value::Null,
        }
    }

    pub fn reply(id: MessageId, outcome: &RelayResult<Value>) -> Self {
        match outcome {
            Ok(result) => Frame::Reply {
                id,
                result: result.clone(),
                error: None,
            },
            Err(err) => Frame::Reply {
                id,
                result: Value::Null,
                error: Some(err.to_descriptor()),
            },
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Frame::Message { id, .. } | Frame::Reply { id, .. } => *id,
        }
    }

    /// The reply as a result, with the error rehydrated.
    pub fn into_outcome(self) -> Option<RelayResult<Value>> {
        match self {
            Frame::Reply { error: Some(desc), .. } => Some(Err(RelayError::from_descriptor(desc))),
            Frame::Reply { result, .. } => Some(Ok(result)),
            Frame::Message { .. } => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Frame::Message { id, kind, payload } => json!([id, kind.as_str(), payload]),
            Frame::Reply { id, result, error } => json!([id, [result, error]]),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn from_value(value: Value) -> TransportResult<Self> {
        let malformed = |why: &str| TransportError::Malformed(format!("{why}: {value}"));
        let Value::Array(items) = &value else {
            return Err(malformed("frame is not an array"));
        };
        let id = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("frame id is not a number"))?;
        match items.as_slice() {
            [_, Value::String(kind), payload] => {
                let kind: MessageKind = serde_json::from_value(Value::String(kind.clone()))
                    .map_err(|_| malformed("unknown message type"))?;
                Ok(Frame::Message {
                    id,
                    kind,
                    payload: payload.clone(),
                })
            }
            [_, Value::Array(response)] => {
                let (result, error) = match response.as_slice() {
                    [result] => (result.clone(), Value::Null),
                    [result, error] => (result.clone(), error.clone()),
                    _ => return Err(malformed("reply is not [result, error]")),
                };
                let error = match error {
                    Value::Null => None,
                    other => Some(
                        serde_json::from_value::<ErrorDescriptor>(other)
                            .map_err(|_| malformed("reply error is not {name, message, stack}"))?,
                    ),
                };
                Ok(Frame::Reply { id, result, error })
            }
            _ => Err(malformed("unrecognised frame shape")),
        }
    }

    pub fn decode(text: &str) -> TransportResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| TransportError::Malformed(err.to_string()))?;
        Self::from_value(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<SessionToken>,
    #[serde(default)]
    pub flaws: Flaws,
    /// Highest message id the client has processed.
    #[serde(default)]
    pub last: MessageId,
    /// The client's last reply frame, in case it never arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub token: SessionToken,
    pub resumed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub path: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub reconnect: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecPayload {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: String,
    pub message: String,
}

/// Script body served at an exec url.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptBody {
    pub source: String,
    #[serde(default)]
    pub args: Vec<Value>,
}
