//! Hybrid retrieval: lexical BM25 index, reciprocal-rank fusion, reranking.
//!
//! Vector retrieval goes through the `VectorStore` capability; this module
//! owns the lexical side, the fusion of both ranked lists, and the
//! cross-encoder rerank seam. The lexical index is a read-only snapshot
//! rebuilt on commit and swapped atomically, like the intent registry.

mod bm25;
mod excerpt;
mod fusion;
mod rerank;

pub use bm25::{tokenize, LexicalIndex, LexicalSnapshot};
pub use excerpt::excerpt_around;
pub use fusion::fuse;
pub use rerank::{apply_rerank, EmbeddingReranker, LexicalReranker, Reranker};

use crate::model::ScoredPair;

/// One hit of the search surface: pair, rerank score, and an excerpt windowed
/// around the best-matching terms.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub pair: crate::model::QAPair,
    pub score: f32,
    pub excerpt: String,
}

impl SearchHit {
    pub fn from_scored(scored: ScoredPair, query: &str) -> Self {
        let excerpt = excerpt_around(&scored.pair.answer, query, 160);
        Self {
            pair: scored.pair,
            score: scored.score,
            excerpt,
        }
    }
}
