//! Archive node: persists the immutable query record.

use async_trait::async_trait;
use chrono::Utc;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::{QueryRecord, RouteAction, SourceRef};
use crate::state::{Field, QueryState};
use crate::telemetry::QueryTelemetry;

use super::require_question;

/// Builds the `QueryRecord` from the final state plus the telemetry recorded
/// so far and inserts it. The record is immutable once written.
pub struct ArchiveNode;

/// Assembles the record; shared with the service surface so the caller can
/// return exactly what was stored.
pub fn build_record(ctx: &PipelineContext, state: &QueryState) -> QueryRecord {
    let sources: Vec<SourceRef> = state
        .docs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|d| SourceRef {
            pair_id: d.pair.id.clone(),
            relevance: d.score,
        })
        .collect();
    QueryRecord {
        id: state
            .query_id
            .clone()
            .unwrap_or_else(|| format!("qry_{}", uuid::Uuid::new_v4().simple())),
        question: state.question.clone().unwrap_or_default(),
        normalized_key: state.normalized_key.clone().unwrap_or_default(),
        answer: state.answer.clone().filter(|a| !a.is_empty()),
        confidence: state.confidence.unwrap_or(0.0),
        sources,
        action: state.action.unwrap_or(RouteAction::Escalate),
        escalation_reason: state.escalation_reason.clone(),
        telemetry: QueryTelemetry {
            nodes: ctx.telemetry_so_far(),
            cache_hit: state.cache_hit.unwrap_or(false),
            hops_used: state.hops_used.unwrap_or(if state.cache_hit == Some(true) { 0 } else { 1 }),
            total_ms: ctx.started.elapsed().as_millis() as u64,
        },
        created_at: Utc::now(),
    }
}

#[async_trait]
impl PipelineNode for ArchiveNode {
    fn id(&self) -> &str {
        "archive"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .optional(&[
                Field::Answer,
                Field::Confidence,
                Field::Action,
                Field::Docs,
                Field::EscalationReason,
                Field::NormalizedKey,
                Field::CacheHit,
                Field::HopsUsed,
                Field::QueryId,
            ])
            .guarantees(&[Field::QueryId])
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        require_question(input)?;
        let record = build_record(ctx, input);
        ctx.relational.insert_query_record(&record).await?;
        tracing::debug!(query_id = %record.id, action = ?record.action, "query record archived");

        let patch = QueryState {
            query_id: Some(record.id),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
