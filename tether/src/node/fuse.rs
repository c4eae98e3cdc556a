//! Fusion node: reciprocal-rank fusion of the two retrieval lists.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::QAPair;
use crate::search::fuse;
use crate::state::{Field, QueryState};

/// Fuses vector and lexical hits with the configured alpha and truncates to
/// the retrieval top-k.
pub struct FuseNode;

#[async_trait]
impl PipelineNode for FuseNode {
    fn id(&self) -> &str {
        "fuse"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::VectorHits, Field::LexicalHits])
            .guarantees(&[Field::Docs])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            docs: Some(Vec::new()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let vector: Vec<(QAPair, f32)> = input
            .vector_hits
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|s| (s.pair.clone(), s.vector_score))
            .collect();
        let lexical: Vec<(QAPair, f32)> = input
            .lexical_hits
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|s| (s.pair.clone(), s.lexical_score))
            .collect();

        let mut fused = fuse(&vector, &lexical, ctx.config.search.alpha);
        fused.truncate(ctx.config.search.top_k);
        tracing::debug!(candidates = fused.len(), "fused retrieval lists");

        let patch = QueryState {
            docs: Some(fused),
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

    /// **Scenario**: Pairs present in both lists rank ahead of single-list
    /// pairs after fusion.
    #[tokio::test]
    async fn fusion_prefers_agreement() {
        let ctx = test_support::context_with_corpus().await;
        let pair = |id: &str| test_support::corpus_pair(id);

        let input = QueryState {
            vector_hits: Some(vec![
                {
                    let mut s = ScoredPair::primary(pair("qa_password"), 0.9);
                    s.vector_score = 0.9;
                    s
                },
                {
                    let mut s = ScoredPair::primary(pair("qa_refund"), 0.5);
                    s.vector_score = 0.5;
                    s
                },
            ]),
            lexical_hits: Some(vec![{
                let mut s = ScoredPair::primary(pair("qa_password"), 4.0);
                s.lexical_score = 4.0;
                s
            }]),
            ..Default::default()
        };
        let (patch, _) = FuseNode.execute(&ctx, &input).await.unwrap();
        let docs = patch.docs.unwrap();
        assert_eq!(docs[0].pair.id, "qa_password");
        assert_eq!(docs[0].fusion_rank, 0);
        assert_eq!(docs.len(), 2);
    }
}
