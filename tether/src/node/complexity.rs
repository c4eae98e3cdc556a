//! Complexity scoring node: plans the hop budget without a model call.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::multihop::{complexity_score, plan_hops};
use crate::state::{Field, QueryState};

use super::require_question;

/// Computes the complexity score and hop budget. Simple questions skip the
/// multi-hop stage and jump straight to context merging; `hops_used` starts at
/// 1 (the normal retrieval) and multi-hop overwrites it when it runs.
pub struct ComplexityNode;

#[async_trait]
impl PipelineNode for ComplexityNode {
    fn id(&self) -> &str {
        "complexity"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .guarantees(&[Field::ComplexityScore, Field::PlannedHops, Field::HopsUsed])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["context_merge"]
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            complexity_score: Some(0.0),
            planned_hops: Some(1),
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
        let score = complexity_score(question);
        let planned = plan_hops(score, &ctx.config.multihop);
        tracing::debug!(score, planned, "complexity planned");

        let patch = QueryState {
            complexity_score: Some(score),
            planned_hops: Some(planned),
            hops_used: Some(1),
            ..Default::default()
        };
        let next = if planned > 1 {
            Next::Continue
        } else {
            Next::Node("context_merge".into())
        };
        Ok((patch, next))
    }
}
