//! Multi-hop expansion and context-merge nodes.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::multihop::{expand_hops, merge_context};
use crate::state::{Field, QueryState};

use super::require_question;

/// Expands the working set by following the top pair's category, intent, and
/// `see_also` references for the planned number of hops.
pub struct MultiHopNode;

#[async_trait]
impl PipelineNode for MultiHopNode {
    fn id(&self) -> &str {
        "multi_hop"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question, Field::Docs, Field::PlannedHops])
            .guarantees(&[Field::HopsUsed])
            .conditional(&[Field::Docs])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            hops_used: Some(1),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let docs = input.docs.clone().unwrap_or_default();
        let planned = input.planned_hops.unwrap_or(1);

        let (added, performed) = expand_hops(
            ctx.relational.as_ref(),
            ctx.reranker.as_ref(),
            question,
            &docs,
            planned,
            &ctx.config.multihop,
        )
        .await?;
        tracing::debug!(planned, performed, added = added.len(), "multi-hop expansion");

        let mut merged = docs;
        merged.extend(added);

        let patch = QueryState {
            docs: Some(merged),
            hops_used: Some(1 + performed),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}

/// Concatenates the working set into the generation context under the token
/// budget, primary pair first and never truncated.
pub struct ContextMergeNode;

#[async_trait]
impl PipelineNode for ContextMergeNode {
    fn id(&self) -> &str {
        "context_merge"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Docs])
            .guarantees(&[Field::MergedContext])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            merged_context: Some(String::new()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let docs = input.docs.as_deref().unwrap_or_default();
        let merged = merge_context(docs, ctx.config.multihop.context_token_budget);
        let patch = QueryState {
            merged_context: Some(merged),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
