//! Cross-encoder rerank seam.
//!
//! The reranker scores (query, candidate question+answer) jointly and replaces
//! the fusion scores on the top-N candidates. `confidence` becomes the top-1
//! rerank score. Ties between rerank scores break on the original fusion rank.

use async_trait::async_trait;

use crate::llm::{Embedder, LlmError};
use crate::model::{QAPair, ScoredPair};
use crate::store::vector::cosine_similarity;

use super::bm25::tokenize;

/// Scores candidates against a query; one score per candidate, in order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidates: &[QAPair]) -> Result<Vec<f32>, LlmError>;
}

/// Embedding-based reranker: embeds the query and each candidate's
/// question+answer text in one batch, scoring by cosine similarity.
pub struct EmbeddingReranker {
    embedder: std::sync::Arc<dyn Embedder>,
}

impl EmbeddingReranker {
    pub fn new(embedder: std::sync::Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Reranker for EmbeddingReranker {
    async fn score(&self, query: &str, candidates: &[QAPair]) -> Result<Vec<f32>, LlmError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = candidates.iter().map(|c| c.searchable_text()).collect();
        let mut inputs: Vec<&str> = Vec::with_capacity(texts.len() + 1);
        inputs.push(query);
        inputs.extend(texts.iter().map(String::as_str));

        let vectors = self.embedder.embed(&inputs).await?;
        let (query_vec, candidate_vecs) = vectors
            .split_first()
            .ok_or_else(|| LlmError::Provider("embedder returned no vectors".into()))?;
        Ok(candidate_vecs
            .iter()
            .map(|v| cosine_similarity(query_vec, v))
            .collect())
    }
}

/// Token-overlap reranker: the F1 of shared tokens between query and
/// candidate. Model-free fallback; also the deterministic choice for tests.
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, candidates: &[QAPair]) -> Result<Vec<f32>, LlmError> {
        let query_tokens: std::collections::HashSet<String> =
            tokenize(query).into_iter().collect();
        Ok(candidates
            .iter()
            .map(|c| {
                let candidate_tokens: std::collections::HashSet<String> =
                    tokenize(&c.searchable_text()).into_iter().collect();
                let shared = query_tokens.intersection(&candidate_tokens).count() as f32;
                if shared == 0.0 {
                    return 0.0;
                }
                let precision = shared / candidate_tokens.len().max(1) as f32;
                let recall = shared / query_tokens.len().max(1) as f32;
                2.0 * precision * recall / (precision + recall)
            })
            .collect())
    }
}

/// Replaces fusion scores with rerank scores and re-sorts. Rerank-score ties
/// keep the original fusion order. Returns the reranked list; the caller takes
/// `confidence` from the first element.
pub fn apply_rerank(mut docs: Vec<ScoredPair>, scores: &[f32]) -> Vec<ScoredPair> {
    for (doc, score) in docs.iter_mut().zip(scores.iter()) {
        doc.score = *score;
    }
    docs.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.fusion_rank.cmp(&b.fusion_rank))
    });
    docs
}
