//! The pipeline node library.
//!
//! Each node is a value implementing [`PipelineNode`](crate::graph::PipelineNode)
//! with a declared contract. The default query pipeline wires them in this
//! order (conditional jumps in parentheses):
//!
//! input_guardrails (→ refusal) → cache_lookup (→ archive) → language →
//! intent → retrieval_filter → expand → vector_retrieve → lexical_retrieve →
//! fuse → rerank (→ dialog_state) → complexity (→ context_merge) → multi_hop →
//! context_merge → dialog_state → route (→ generate | refusal) → generate
//! (→ refusal) → output_guardrails (→ archive | refusal) → refusal → archive →
//! cache_store

mod archive;
mod cache;
mod complexity;
mod dialog_state;
mod expand;
mod fuse;
mod generate;
mod input_guardrails;
mod intent;
mod language;
mod multi_hop;
mod output_guardrails;
mod refusal;
mod rerank;
mod retrieval_filter;
mod retrieve;
mod route;

pub use archive::{build_record as archive_record, ArchiveNode};
pub use cache::{CacheLookupNode, CacheStoreNode};
pub use complexity::ComplexityNode;
pub use dialog_state::DialogStateNode;
pub use expand::ExpandNode;
pub use fuse::FuseNode;
pub use generate::GenerateNode;
pub use input_guardrails::InputGuardrailsNode;
pub use intent::IntentNode;
pub use language::LanguageNode;
pub use multi_hop::{ContextMergeNode, MultiHopNode};
pub use output_guardrails::OutputGuardrailsNode;
pub use refusal::RefusalNode;
pub use rerank::RerankNode;
pub use retrieval_filter::RetrievalFilterNode;
pub use retrieve::{LexicalRetrieveNode, VectorRetrieveNode};
pub use route::RouteNode;

use crate::error::NodeError;
use crate::state::QueryState;

/// The question from a projected input; a missing one is a validation bug
/// upstream of the node.
pub(crate) fn require_question(input: &QueryState) -> Result<&str, NodeError> {
    input
        .question
        .as_deref()
        .ok_or_else(|| NodeError::validation("question missing from projected input"))
}

/// Escalation reason literals shared by routing, refusal, and tests.
pub mod reasons {
    pub const NO_RELEVANT_CONTEXT: &str = "no_relevant_context";
    pub const LOW_CONFIDENCE: &str = "low_confidence";
    pub const REQUIRES_HANDOFF: &str = "requires_handoff";
    pub const GUARDRAIL_BLOCK: &str = "guardrail_block";
    pub const MODEL_REFUSAL: &str = "model_refusal";
    pub const UNGROUNDED_ANSWER: &str = "ungrounded_answer";
    pub const DISALLOWED_OUTPUT: &str = "disallowed_output";
    pub const DIALOG_ESCALATED: &str = "dialog_escalated";
}
