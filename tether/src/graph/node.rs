//! Pipeline node trait: one typed step with a declared contract.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::state::QueryState;

use super::{Next, PipelineContext};

/// One step in the query pipeline: projected state in, patch + routing out.
///
/// Nodes are plain values carrying their contract; the engine is a generic
/// driver. A node never sees fields outside its declared inputs, and its patch
/// is validated against its declared outputs before merging.
#[async_trait]
pub trait PipelineNode: Send + Sync {
    /// Node id (e.g. `"rerank"`). Must be unique within a pipeline.
    fn id(&self) -> &str;

    /// Declared inputs and outputs. Evaluated once at compile time.
    fn contract(&self) -> NodeContract;

    /// Ids this node may return via `Next::Node`, validated at compile time.
    fn jump_targets(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Whether the engine may omit this node when it is disabled in config.
    /// Disabling a non-optional node is a compile error.
    fn optional(&self) -> bool {
        false
    }

    /// The documented default patch applied when this node fails under the
    /// `recover` policy.
    fn recovery_patch(&self) -> QueryState {
        QueryState::default()
    }

    /// One step. `input` is the shared state projected down to the declared
    /// inputs; the returned patch carries only this node's outputs.
    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError>;
}
