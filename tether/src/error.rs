//! Pipeline and node error types.
//!
//! `PipelineError` is the crate-level error returned by the service surface and
//! the graph engine. `NodeError` is the structured error a single pipeline node
//! reports; the engine maps it through the node's failure policy.

use thiserror::Error;

/// Machine-readable error classification, used for routing and for the error
/// envelope handed to the adapter layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Contract,
    Upstream,
    Timeout,
    Guardrail,
    CommitConflict,
    NotFound,
    AlreadyExists,
    Internal,
}

/// Crate-level error. Raw store or provider error text is wrapped here and never
/// forwarded verbatim to a user-facing answer; the service always produces either
/// a `QueryRecord` or a structured error from this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input: length, format, or a missing required field. Not retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A node broke its declared contract (missing guaranteed output, undeclared
    /// field in strict mode, or missing required input in strict mode).
    #[error("contract violation in node {node}: {detail}")]
    ContractViolation { node: String, detail: String },

    /// A store or model provider failed. Retryable by policy.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A per-node, per-call, or per-query deadline elapsed.
    #[error("timeout in {0}")]
    Timeout(String),

    /// A guardrail rejected content. Not an error to the caller; surfaced as a
    /// refusal/escalation outcome, but kept here for internal propagation.
    #[error("guardrail block: {0}")]
    GuardrailBlock(String),

    /// Another commit holds the advisory lock for the same draft.
    #[error("commit already in progress for draft {0}")]
    CommitConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::ContractViolation { .. } => ErrorKind::Contract,
            PipelineError::Upstream(_) => ErrorKind::Upstream,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::GuardrailBlock(_) => ErrorKind::Guardrail,
            PipelineError::CommitConflict(_) => ErrorKind::CommitConflict,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may retry the same operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Upstream(_)
                | PipelineError::Timeout(_)
                | PipelineError::CommitConflict(_)
        )
    }
}

/// Error kind a node reports to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    Validation,
    Timeout,
    Upstream,
    Internal,
}

/// Structured error from one pipeline node. The engine applies the node's
/// configured failure policy (`fatal` / `recover` / `bypass`) to decide whether
/// this terminates the query.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl NodeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Validation,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Upstream,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps into the crate-level error, attaching the failing node's id.
    pub fn into_pipeline_error(self, node: &str) -> PipelineError {
        match self.kind {
            NodeErrorKind::Validation => {
                PipelineError::Validation(format!("{}: {}", node, self.message))
            }
            NodeErrorKind::Timeout => PipelineError::Timeout(node.to_string()),
            NodeErrorKind::Upstream => {
                PipelineError::Upstream(format!("{}: {}", node, self.message))
            }
            NodeErrorKind::Internal => {
                PipelineError::Internal(format!("{}: {}", node, self.message))
            }
        }
    }
}

impl From<crate::store::StoreError> for NodeError {
    fn from(e: crate::store::StoreError) -> Self {
        NodeError::upstream(e.to_string())
    }
}

impl From<crate::llm::LlmError> for NodeError {
    fn from(e: crate::llm::LlmError) -> Self {
        match e {
            crate::llm::LlmError::Timeout => NodeError::timeout("model call timed out"),
            other => NodeError::upstream(other.to_string()),
        }
    }
}

impl From<crate::store::StoreError> for PipelineError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::NotFound(what) => PipelineError::NotFound(what),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}

impl From<crate::llm::LlmError> for PipelineError {
    fn from(e: crate::llm::LlmError) -> Self {
        PipelineError::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Retryable kinds are exactly Upstream, Timeout, and CommitConflict.
    #[test]
    fn retryable_kinds() {
        assert!(PipelineError::Upstream("db down".into()).retryable());
        assert!(PipelineError::Timeout("rerank".into()).retryable());
        assert!(PipelineError::CommitConflict("d1".into()).retryable());
        assert!(!PipelineError::Validation("empty".into()).retryable());
        assert!(!PipelineError::NotFound("pair".into()).retryable());
    }

    /// **Scenario**: A node timeout maps to `PipelineError::Timeout` carrying the node id.
    #[test]
    fn node_error_maps_with_node_id() {
        let err = NodeError::timeout("slow").into_pipeline_error("rerank");
        match err {
            PipelineError::Timeout(node) => assert_eq!(node, "rerank"),
            other => panic!("expected Timeout, got {:?}", other),
        }
        let err = NodeError::upstream("x").into_pipeline_error("retrieve");
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("retrieve"));
    }
}
