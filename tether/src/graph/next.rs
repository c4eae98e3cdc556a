//! Next-step result from a pipeline node: continue the declared order, jump
//! to a node, or end.
//!
//! Conditional edges are expressed by nodes returning `Next::Node(id)`; the
//! targets are declared via `PipelineNode::jump_targets` and validated at
//! compile time.

/// Next step after running a node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Next {
    /// Follow the declared order; if this node is last, equivalent to End.
    Continue,
    /// Jump to the node with the given id (a declared jump target).
    Node(String),
    /// Stop; the current state is the final state.
    End,
}
