//! Compile-time validation errors for pipeline graphs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("declared order is empty")]
    EmptyOrder,

    #[error("node {node} declares unknown jump target {target}")]
    UnknownJumpTarget { node: String, target: String },

    #[error("node {0} is disabled but not optional")]
    DisabledRequiredNode(String),
}
