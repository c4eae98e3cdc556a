//! Vector and lexical retrieval nodes.
//!
//! Both run over the query set (the question plus any expanded variants) and
//! the retrieval filter. An empty filtered result triggers the safety
//! fallback: one retry without the category filter.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::{QAPair, ScoredPair};
use crate::state::{Field, QueryState};
use crate::store::VectorFilter;

use super::require_question;

fn query_set(input: &QueryState) -> Result<Vec<String>, NodeError> {
    let question = require_question(input)?.to_string();
    let mut queries = vec![question];
    if let Some(expanded) = &input.expanded_queries {
        for q in expanded {
            if !queries.contains(q) {
                queries.push(q.clone());
            }
        }
    }
    Ok(queries)
}

fn to_scored(pairs_by_id: &HashMap<String, QAPair>, scores: Vec<(String, f32)>) -> Vec<ScoredPair> {
    let mut out: Vec<ScoredPair> = scores
        .into_iter()
        .filter_map(|(id, score)| {
            pairs_by_id.get(&id).map(|pair| {
                let mut scored = ScoredPair::primary(pair.clone(), score);
                scored.vector_score = score;
                scored
            })
        })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// k-NN retrieval over pair embeddings for each query in the set, merged by
/// pair id keeping the best score.
pub struct VectorRetrieveNode;

impl VectorRetrieveNode {
    async fn search_all(
        ctx: &PipelineContext,
        queries: &[String],
        filter: &VectorFilter,
    ) -> Result<HashMap<String, f32>, NodeError> {
        let refs: Vec<&str> = queries.iter().map(String::as_str).collect();
        let vectors = ctx.embedder.embed(&refs).await?;
        let top_k = ctx.config.search.top_k;
        let floor = ctx.config.search.min_vector_score;

        let mut best: HashMap<String, f32> = HashMap::new();
        for vector in &vectors {
            let hits = ctx.vector.search(vector, top_k, filter).await?;
            for hit in hits.into_iter().filter(|h| h.score >= floor) {
                let entry = best.entry(hit.pair_id).or_insert(f32::MIN);
                *entry = entry.max(hit.score);
            }
        }
        Ok(best)
    }
}

#[async_trait]
impl PipelineNode for VectorRetrieveNode {
    fn id(&self) -> &str {
        "vector_retrieve"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question, Field::RetrievalFilter])
            .optional(&[Field::ExpandedQueries])
            .guarantees(&[Field::VectorHits])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            vector_hits: Some(Vec::new()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let queries = query_set(input)?;
        let filter = input
            .retrieval_filter
            .clone()
            .unwrap_or(VectorFilter::All);

        let mut best = Self::search_all(ctx, &queries, &filter).await?;
        if best.is_empty() && filter != VectorFilter::All {
            tracing::debug!("vector retrieval empty under category filter, retrying unfiltered");
            best = Self::search_all(ctx, &queries, &VectorFilter::All).await?;
        }

        let ids: Vec<String> = best.keys().cloned().collect();
        let pairs = ctx.relational.get_pairs(&ids).await?;
        let pairs_by_id: HashMap<String, QAPair> =
            pairs.into_iter().map(|p| (p.id.clone(), p)).collect();
        let scored = to_scored(&pairs_by_id, best.into_iter().collect());

        let patch = QueryState {
            vector_hits: Some(scored),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}

/// BM25 retrieval over the pinned lexical snapshot for each query in the set,
/// merged by pair id keeping the best score.
pub struct LexicalRetrieveNode;

#[async_trait]
impl PipelineNode for LexicalRetrieveNode {
    fn id(&self) -> &str {
        "lexical_retrieve"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question, Field::RetrievalFilter])
            .optional(&[Field::ExpandedQueries])
            .guarantees(&[Field::LexicalHits])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            lexical_hits: Some(Vec::new()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let queries = query_set(input)?;
        let filter = input
            .retrieval_filter
            .clone()
            .unwrap_or(VectorFilter::All);
        let top_k = ctx.config.search.top_k;

        let search = |filter: VectorFilter| {
            let mut best: HashMap<String, (QAPair, f32)> = HashMap::new();
            for query in &queries {
                for (pair, score) in ctx.lexical.search(query, top_k, &filter) {
                    let entry = best
                        .entry(pair.id.clone())
                        .or_insert_with(|| (pair.clone(), f32::MIN));
                    entry.1 = entry.1.max(score);
                }
            }
            best
        };

        let mut best = search(filter.clone());
        if best.is_empty() && filter != VectorFilter::All {
            tracing::debug!("lexical retrieval empty under category filter, retrying unfiltered");
            best = search(VectorFilter::All);
        }

        let mut scored: Vec<ScoredPair> = best
            .into_values()
            .map(|(pair, score)| {
                let mut s = ScoredPair::primary(pair, score);
                s.lexical_score = score;
                s.vector_score = 0.0;
                s
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let patch = QueryState {
            lexical_hits: Some(scored),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn input(question: &str, filter: VectorFilter) -> QueryState {
        QueryState {
            question: Some(question.into()),
            retrieval_filter: Some(filter),
            ..Default::default()
        }
    }

    /// **Scenario**: Vector retrieval finds the password pair for the
    /// password question.
    #[tokio::test]
    async fn vector_retrieval_finds_relevant() {
        let ctx = test_support::context_with_corpus().await;
        let (patch, _) = VectorRetrieveNode
            .execute(
                &ctx,
                &input("How do I reset my password?", VectorFilter::All),
            )
            .await
            .unwrap();
        let hits = patch.vector_hits.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].pair.id, "qa_password");
    }

    /// **Scenario**: An empty filtered result falls back to unfiltered
    /// retrieval.
    #[tokio::test]
    async fn safety_fallback_on_empty_filter() {
        let ctx = test_support::context_with_corpus().await;
        let (patch, _) = VectorRetrieveNode
            .execute(
                &ctx,
                &input(
                    "How do I reset my password?",
                    VectorFilter::category("nonexistent"),
                ),
            )
            .await
            .unwrap();
        assert!(!patch.vector_hits.unwrap().is_empty());
    }

    /// **Scenario**: Lexical retrieval scores the refund pair for refund terms.
    #[tokio::test]
    async fn lexical_retrieval_finds_relevant() {
        let ctx = test_support::context_with_corpus().await;
        let (patch, _) = LexicalRetrieveNode
            .execute(&ctx, &input("what is the refund policy", VectorFilter::All))
            .await
            .unwrap();
        let hits = patch.lexical_hits.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].pair.id, "qa_refund");
    }
}
