use thiserror::Error;

use crate::node::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
}

pub type DomResult<T> = Result<T, DomError>;
