use std::fmt::Display;
use thiserror::Error;

use crate::graph::NodeId;

/// All errors surfaced by the nodeflow engine and by node implementations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    /// A node's exec (or fallback) failed
    #[error("Node execution error: {0}")]
    NodeExecution(String),

    /// A node id that was never registered in the graph it is used with
    #[error("Node {0} is not part of this graph")]
    UnknownNode(NodeId),

    /// A context entry or parameter could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Generic(String),
}

/// A specialized Result type for nodeflow operations
pub type FlowResult<T> = Result<T, FlowError>;

impl FlowError {
    /// Create a new node execution error
    pub fn node_execution(node: impl Display, message: impl Display) -> Self {
        Self::NodeExecution(format!("Node {}: {}", node, message))
    }

    pub fn generic(message: impl Display) -> Self {
        Self::Generic(message.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
