use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stack frames belonging to the relay machinery rather than to the failing code.
const INTERNAL_FRAMES: &[&str] = &[
    "crossrun_transport::",
    "crossrun_client::runtime",
    "crossrun_scheduler::queue",
    "/transport/src/",
];

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RelayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{target} is covered by {by}")]
    Covered { target: String, by: String },
    #[error("{0}")]
    NotVisible(String),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    InvalidTool(String),
    #[error("{0}")]
    Aborted(String),
    #[error("{0}")]
    InvalidHook(String),
    #[error("{}", .0.message)]
    Remote(ErrorDescriptor),
    /// A rehydrated error that kept the remote stack.
    #[error("{error}")]
    Traced {
        error: Box<RelayError>,
        stack: String,
    },
}

impl RelayError {
    pub fn name(&self) -> &str {
        match self {
            RelayError::NotFound(_) => "NotFoundError",
            RelayError::Precondition(_) => "PreconditionError",
            RelayError::Covered { .. } => "CoveredError",
            RelayError::NotVisible(_) => "NotVisibleError",
            RelayError::Transport(_) => "TransportError",
            RelayError::Timeout(_) => "TimeoutError",
            RelayError::InvalidTool(_) => "TypeError",
            RelayError::Aborted(_) => "AbortError",
            RelayError::InvalidHook(_) => "HookError",
            RelayError::Remote(desc) => &desc.name,
            RelayError::Traced { error, .. } => error.name(),
        }
    }

    /// The error with any carried stack stripped off.
    pub fn root(&self) -> &RelayError {
        match self {
            RelayError::Traced { error, .. } => error.root(),
            other => other,
        }
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            RelayError::Traced { stack, .. } => Some(stack),
            RelayError::Remote(desc) => desc.stack.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), RelayError::NotFound(_))
    }

    /// Failures worth retrying from `runner.until`.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.root(),
            RelayError::InvalidTool(_) | RelayError::InvalidHook(_) | RelayError::Aborted(_)
        )
    }

    pub fn to_descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            name: self.name().to_string(),
            message: self.to_string(),
            stack: self.stack().map(str::to_string),
        }
    }

    /// Rebuilds a typed error from its wire form, trimming relay frames from the stack.
    pub fn from_descriptor(desc: ErrorDescriptor) -> Self {
        let ErrorDescriptor {
            name,
            message,
            stack,
        } = desc;
        let stack = stack.map(|raw| trim_stack(&raw)).filter(|s| !s.is_empty());
        let error = match name.as_str() {
            "NotFoundError" => RelayError::NotFound(message),
            "PreconditionError" => RelayError::Precondition(message),
            "CoveredError" => match message.split_once(" is covered by ") {
                Some((target, by)) => RelayError::Covered {
                    target: target.to_string(),
                    by: by.to_string(),
                },
                None => RelayError::Covered {
                    target: message,
                    by: String::from("unknown element"),
                },
            },
            "NotVisibleError" => RelayError::NotVisible(message),
            "TransportError" => RelayError::Transport(message),
            "TimeoutError" => RelayError::Timeout(message),
            "TypeError" => RelayError::InvalidTool(message),
            "AbortError" => RelayError::Aborted(message),
            "HookError" => RelayError::InvalidHook(message),
            _ => {
                return RelayError::Remote(ErrorDescriptor {
                    name,
                    message,
                    stack,
                })
            }
        };
        match stack {
            Some(stack) => RelayError::Traced {
                error: Box::new(error),
                stack,
            },
            None => error,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::InvalidTool(format!("malformed arguments: {err}"))
    }
}

/// Wire form of an error: `{name, message, stack}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorDescriptor {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

pub fn trim_stack(stack: &str) -> String {
    stack
        .lines()
        .filter(|line| !INTERNAL_FRAMES.iter().any(|frame| line.contains(frame)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_rehydrate_into_variants() {
        let err = RelayError::from_descriptor(ErrorDescriptor::new(
            "PreconditionError",
            "<button id=\"go\"> is disabled",
        ));
        assert_eq!(
            err,
            RelayError::Precondition("<button id=\"go\"> is disabled".into())
        );
        assert_eq!(err.name(), "PreconditionError");
    }

    #[test]
    fn covered_round_trips_target_and_occluder() {
        let original = RelayError::Covered {
            target: "<button>".into(),
            by: "<div class=\"modal\">".into(),
        };
        let back = RelayError::from_descriptor(original.to_descriptor());
        assert_eq!(back, original);
    }

    #[test]
    fn unknown_names_stay_remote() {
        let err = RelayError::from_descriptor(ErrorDescriptor::new("RangeError", "bad index"));
        assert_eq!(err.name(), "RangeError");
        assert_eq!(err.to_string(), "bad index");
    }

    #[test]
    fn stack_loses_relay_frames() {
        let stack = "at click (app.js:10)\n\
                     at crossrun_transport::hub::dispatch\n\
                     at crossrun_client::runtime::handle_tool\n\
                     at test body (spec.js:4)";
        let err = RelayError::from_descriptor(
            ErrorDescriptor::new("TimeoutError", "timed out").with_stack(stack),
        );
        assert_eq!(err.name(), "TimeoutError");
        assert_eq!(err.root(), &RelayError::Timeout("timed out".into()));
        assert_eq!(
            err.stack(),
            Some("at click (app.js:10)\nat test body (spec.js:4)")
        );
    }

    #[test]
    fn retryable_excludes_programmer_errors() {
        assert!(RelayError::NotFound("x".into()).is_retryable());
        assert!(!RelayError::InvalidTool("x".into()).is_retryable());
    }
}
