//! Rerank node: cross-encoder scoring of the fused candidates.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::QAPair;
use crate::search::apply_rerank;
use crate::state::{Field, QueryState};

use super::reasons;
use super::require_question;

/// Replaces fusion scores with rerank scores on the top-N candidates; the
/// top-1 rerank score becomes the retrieval confidence. An empty candidate
/// set short-circuits to the dialog-state step with zero confidence, forcing
/// escalation downstream.
pub struct RerankNode;

#[async_trait]
impl PipelineNode for RerankNode {
    fn id(&self) -> &str {
        "rerank"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question, Field::Docs])
            .guarantees(&[Field::Confidence])
            .conditional(&[Field::Docs, Field::EscalationReason])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["dialog_state"]
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            confidence: Some(0.0),
            escalation_reason: Some(reasons::NO_RELEVANT_CONTEXT.into()),
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

        if docs.is_empty() {
            tracing::info!("no candidates after retrieval and fallback, forcing escalation");
            let patch = QueryState {
                confidence: Some(0.0),
                docs: Some(Vec::new()),
                escalation_reason: Some(reasons::NO_RELEVANT_CONTEXT.into()),
                ..Default::default()
            };
            return Ok((patch, Next::Node("dialog_state".into())));
        }

        let mut head: Vec<_> = docs;
        head.truncate(ctx.config.search.rerank_top_n);
        let candidates: Vec<QAPair> = head.iter().map(|d| d.pair.clone()).collect();
        let scores = ctx
            .reranker
            .score(question, &candidates)
            .await
            .map_err(|e| NodeError::upstream(e.to_string()))?;

        let reranked = apply_rerank(head, &scores);
        let confidence = reranked
            .first()
            .map(|d| d.score.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let patch = QueryState {
            confidence: Some(confidence),
            docs: Some(reranked),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScoredPair;
    use crate::test_support;

    /// **Scenario**: The on-topic candidate rises to the top and sets the
    /// confidence.
    #[tokio::test]
    async fn rerank_orders_and_scores() {
        let ctx = test_support::context_with_corpus().await;
        let mut off_topic = ScoredPair::primary(test_support::corpus_pair("qa_shipping"), 0.9);
        off_topic.fusion_rank = 0;
        let mut on_topic = ScoredPair::primary(test_support::corpus_pair("qa_password"), 0.8);
        on_topic.fusion_rank = 1;

        let input = QueryState {
            question: Some("How do I reset my password?".into()),
            docs: Some(vec![off_topic, on_topic]),
            ..Default::default()
        };
        let (patch, next) = RerankNode.execute(&ctx, &input).await.unwrap();
        assert_eq!(next, Next::Continue);
        let docs = patch.docs.unwrap();
        assert_eq!(docs[0].pair.id, "qa_password");
        assert_eq!(patch.confidence, Some(docs[0].score.clamp(0.0, 1.0)));
    }

    /// **Scenario**: No candidates forces zero confidence and a jump past the
    /// multi-hop stages.
    #[tokio::test]
    async fn empty_docs_force_escalation_path() {
        let ctx = test_support::context_with_corpus().await;
        let input = QueryState {
            question: Some("Do you sell helicopters?".into()),
            docs: Some(Vec::new()),
            ..Default::default()
        };
        let (patch, next) = RerankNode.execute(&ctx, &input).await.unwrap();
        assert_eq!(patch.confidence, Some(0.0));
        assert_eq!(
            patch.escalation_reason.as_deref(),
            Some(reasons::NO_RELEVANT_CONTEXT)
        );
        assert_eq!(next, Next::Node("dialog_state".into()));
    }
}
