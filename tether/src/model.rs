//! Domain records: Q&A pairs, documents, query records, cache entries.
//!
//! These are the rows the stores persist and the values the pipeline state
//! carries. `QAPair` is the unit of retrieval and grounding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;

/// Supported answer languages. The bilingual word lists (stopwords, logical
/// connectors, handoff keywords) cover these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "es" | "spanish" | "español" => Ok(Language::Es),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// Metadata attached to a pair. `confidence` is the classification confidence
/// assigned at ingestion (or 1.0 for manually curated pairs).
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct PairMetadata {
    pub category: String,
    pub intent: String,
    #[serde(default)]
    pub requires_handoff: bool,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
    /// Ids of related pairs, followed during multi-hop expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub see_also: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// An atomic (question, answer, metadata) record; the unit of retrieval and
/// generation grounding.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QAPair {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub metadata: PairMetadata,
}

impl QAPair {
    /// Committed pairs must carry non-empty question, answer, category, and
    /// intent, with classification confidence in [0, 1].
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.question.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "pair {}: empty question",
                self.id
            )));
        }
        if self.answer.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "pair {}: empty answer",
                self.id
            )));
        }
        if self.metadata.category.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "pair {}: empty category",
                self.id
            )));
        }
        if self.metadata.intent.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "pair {}: empty intent",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.metadata.confidence) {
            return Err(PipelineError::Validation(format!(
                "pair {}: confidence {} outside [0, 1]",
                self.id, self.metadata.confidence
            )));
        }
        Ok(())
    }

    /// Text scored by the reranker and indexed lexically: question + answer.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.question, self.answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Active,
    Archived,
}

/// A source document grouping committed pairs. Deleting a document archives
/// its pairs atomically (see `RelationalStore::archive_document`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub pair_ids: Vec<String>,
    pub status: DocumentStatus,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a pair in the working set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PairOrigin {
    /// Retrieved by the initial hybrid search.
    Primary,
    /// Added by multi-hop expansion (1-based hop number).
    Hop(u32),
}

/// A pair with its retrieval scores. `score` is the current ranking score:
/// fusion score after fusion, rerank score after reranking.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoredPair {
    pub pair: QAPair,
    pub score: f32,
    #[serde(default)]
    pub vector_score: f32,
    #[serde(default)]
    pub lexical_score: f32,
    /// Rank in the fused list (0-based); rerank ties break on this.
    #[serde(default)]
    pub fusion_rank: usize,
    pub origin: PairOrigin,
}

impl ScoredPair {
    pub fn primary(pair: QAPair, score: f32) -> Self {
        Self {
            pair,
            score,
            vector_score: 0.0,
            lexical_score: 0.0,
            fusion_rank: 0,
            origin: PairOrigin::Primary,
        }
    }
}

/// Outcome of routing: answer directly or hand off to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    AutoReply,
    Escalate,
}

/// One grounding source of an answer, with its rerank relevance.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceRef {
    pub pair_id: String,
    pub relevance: f32,
}

/// The immutable record of one processed query. Written once by the archive
/// step; never updated.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub question: String,
    pub normalized_key: String,
    pub answer: Option<String>,
    pub confidence: f32,
    pub sources: Vec<SourceRef>,
    pub action: RouteAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    pub telemetry: crate::telemetry::QueryTelemetry,
    pub created_at: DateTime<Utc>,
}

/// A cached answer keyed by the normalized query. Only answers with
/// `confidence >= cache_min_confidence` and `action == auto_reply` are stored.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub query: String,
    pub answer: String,
    pub pair_ids: Vec<String>,
    pub confidence: f32,
    #[serde(default)]
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(confidence: f32) -> QAPair {
        QAPair {
            id: "qa_1".into(),
            question: "How do I reset my password?".into(),
            answer: "Use the reset link on the sign-in page.".into(),
            metadata: PairMetadata {
                category: "account".into(),
                intent: "password_reset".into(),
                confidence,
                ..Default::default()
            },
        }
    }

    /// **Scenario**: A complete pair with confidence in range validates.
    #[test]
    fn valid_pair_passes() {
        assert!(pair(0.9).validate().is_ok());
    }

    /// **Scenario**: Empty fields or out-of-range confidence are rejected.
    #[test]
    fn invalid_pairs_rejected() {
        let mut p = pair(0.9);
        p.question = "  ".into();
        assert!(p.validate().is_err());

        let mut p = pair(0.9);
        p.metadata.intent = String::new();
        assert!(p.validate().is_err());

        assert!(pair(1.5).validate().is_err());
        assert!(pair(-0.1).validate().is_err());
    }

    /// **Scenario**: Language parses from short codes and full names.
    #[test]
    fn language_from_str() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("Spanish".parse::<Language>().unwrap(), Language::Es);
        assert!("fr".parse::<Language>().is_err());
    }
}
