//! Vector capability: pair embeddings with filtered k-NN search.

use async_trait::async_trait;

use crate::model::Language;

use super::StoreError;

/// Payload fields the filter grammar can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Category,
    Intent,
    Language,
}

/// Filter over vector payloads: equality on category/intent/language plus
/// boolean combinators.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum VectorFilter {
    /// Matches every record.
    All,
    Eq(FilterField, String),
    And(Vec<VectorFilter>),
    Or(Vec<VectorFilter>),
}

impl VectorFilter {
    pub fn category(name: impl Into<String>) -> Self {
        VectorFilter::Eq(FilterField::Category, name.into())
    }

    pub fn intent(name: impl Into<String>) -> Self {
        VectorFilter::Eq(FilterField::Intent, name.into())
    }

    pub fn matches(&self, category: &str, intent: &str, language: Language) -> bool {
        match self {
            VectorFilter::All => true,
            VectorFilter::Eq(field, value) => match field {
                FilterField::Category => category == value,
                FilterField::Intent => intent == value,
                FilterField::Language => {
                    value.parse::<Language>().map(|l| l == language).unwrap_or(false)
                }
            },
            VectorFilter::And(parts) => parts.iter().all(|f| f.matches(category, intent, language)),
            VectorFilter::Or(parts) => parts.iter().any(|f| f.matches(category, intent, language)),
        }
    }
}

/// One embedding keyed by pair id, with the payload fields the filter grammar
/// can test. Exactly one current record exists per pair; `upsert` replaces.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VectorRecord {
    pub pair_id: String,
    pub vector: Vec<f32>,
    pub category: String,
    pub intent: String,
    pub language: Language,
    /// Identifier of the embedding model that produced the vector.
    pub model: String,
}

/// A k-NN search result: pair id and cosine similarity in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub pair_id: String,
    pub score: f32,
}

/// Vector store over pair embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or atomically replaces records by pair id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError>;

    async fn delete(&self, pair_ids: &[String]) -> Result<(), StoreError>;

    /// Top-k by cosine similarity among records matching `filter`.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, StoreError>;

    async fn count(&self, filter: &VectorFilter) -> Result<usize, StoreError>;
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Equality and boolean combinators match payloads as declared.
    #[test]
    fn filter_grammar_matches() {
        let f = VectorFilter::And(vec![
            VectorFilter::category("billing"),
            VectorFilter::Or(vec![
                VectorFilter::intent("refund"),
                VectorFilter::intent("invoice"),
            ]),
        ]);
        assert!(f.matches("billing", "refund", Language::En));
        assert!(f.matches("billing", "invoice", Language::Es));
        assert!(!f.matches("billing", "cancel", Language::En));
        assert!(!f.matches("shipping", "refund", Language::En));
        assert!(VectorFilter::All.matches("anything", "at_all", Language::En));
    }

    /// **Scenario**: Language equality parses the filter value.
    #[test]
    fn filter_language_eq() {
        let f = VectorFilter::Eq(FilterField::Language, "es".into());
        assert!(f.matches("c", "i", Language::Es));
        assert!(!f.matches("c", "i", Language::En));
    }

    /// **Scenario**: Cosine similarity is 1.0 for identical and 0.0 for zero vectors.
    #[test]
    fn cosine_basics() {
        let a = [1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
