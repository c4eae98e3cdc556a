//! BM25 lexical scoring over the committed corpus.
//!
//! The index is an immutable snapshot over tokenized question+answer text,
//! rebuilt from the relational store after every commit and swapped atomically.
//! Readers pin the snapshot they started with.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::QAPair;
use crate::store::VectorFilter;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Lowercases and splits on non-alphanumeric boundaries. Language-agnostic;
/// works for both supported languages.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

struct IndexedPair {
    pair: QAPair,
    term_counts: HashMap<String, u32>,
    length: f32,
}

/// Immutable BM25 snapshot.
pub struct LexicalSnapshot {
    entries: Vec<IndexedPair>,
    doc_freq: HashMap<String, u32>,
    avg_length: f32,
}

impl LexicalSnapshot {
    /// Builds the snapshot from committed pairs.
    pub fn build(pairs: &[QAPair]) -> Self {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();
        let mut total_length = 0f32;

        for pair in pairs {
            let tokens = tokenize(&pair.searchable_text());
            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len() as f32;
            entries.push(IndexedPair {
                pair: pair.clone(),
                term_counts,
                length: tokens.len() as f32,
            });
        }

        let avg_length = if entries.is_empty() {
            0.0
        } else {
            total_length / entries.len() as f32
        };
        Self {
            entries,
            doc_freq,
            avg_length,
        }
    }

    pub fn empty() -> Self {
        Self::build(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.entries.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_entry(&self, entry: &IndexedPair, query_terms: &[String]) -> f32 {
        let mut score = 0f32;
        for term in query_terms {
            let tf = entry.term_counts.get(term).copied().unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            let denom = tf + K1 * (1.0 - B + B * entry.length / self.avg_length.max(1.0));
            score += idf * (tf * (K1 + 1.0)) / denom;
        }
        score
    }

    /// Top-k BM25 matches restricted to pairs matching `filter`. Pairs with a
    /// zero score are omitted.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Vec<(QAPair, f32)> {
        let query_terms = tokenize(query);
        let mut scored: Vec<(QAPair, f32)> = self
            .entries
            .iter()
            .filter(|e| {
                filter.matches(
                    &e.pair.metadata.category,
                    &e.pair.metadata.intent,
                    e.pair.metadata.language,
                )
            })
            .map(|e| (e.pair.clone(), self.score_entry(e, &query_terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Holder for the current snapshot; `rebuild` swaps it atomically.
pub struct LexicalIndex {
    current: RwLock<Arc<LexicalSnapshot>>,
}

impl LexicalIndex {
    pub fn new(snapshot: LexicalSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn empty() -> Self {
        Self::new(LexicalSnapshot::empty())
    }

    /// The current snapshot; callers keep it for a whole query.
    pub fn snapshot(&self) -> Arc<LexicalSnapshot> {
        self.current.read().expect("lexical index lock poisoned").clone()
    }

    /// Replaces the snapshot. Running queries keep the one they pinned.
    pub fn rebuild(&self, pairs: &[QAPair]) {
        let snapshot = Arc::new(LexicalSnapshot::build(pairs));
        *self.current.write().expect("lexical index lock poisoned") = snapshot;
    }
}
