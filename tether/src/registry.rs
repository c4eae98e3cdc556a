//! Intent registry: categories and intents with exemplar embeddings.
//!
//! Rebuilt from committed pairs and swapped atomically; queries pin the
//! snapshot they started with, so a refresh never tears a running pipeline.
//! Classification is nearest-exemplar by cosine similarity.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::llm::Embedder;
use crate::model::QAPair;
use crate::store::vector::cosine_similarity;

/// One intent with example utterances and its pre-computed exemplar embedding
/// (the mean of the example embeddings).
#[derive(Debug, Clone)]
pub struct IntentEntry {
    pub intent: String,
    pub examples: Vec<String>,
    pub exemplar: Vec<f32>,
}

/// One category and its intents. The centroid is the mean of the intent
/// exemplars, used for category-level classification.
#[derive(Debug, Clone)]
pub struct CategoryEntry {
    pub category: String,
    pub intents: Vec<IntentEntry>,
    pub centroid: Vec<f32>,
}

/// A classification result from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub category: String,
    pub intent: String,
    pub score: f32,
}

/// Read-only registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub categories: Vec<CategoryEntry>,
    pub version: u64,
    pub built_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    /// Nearest category + intent for a question embedding, with the cosine
    /// score of the winning intent exemplar.
    pub fn classify(&self, embedding: &[f32]) -> Option<Classified> {
        let mut best: Option<Classified> = None;
        for category in &self.categories {
            for intent in &category.intents {
                let score = cosine_similarity(embedding, &intent.exemplar);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(Classified {
                        category: category.category.clone(),
                        intent: intent.intent.clone(),
                        score,
                    });
                }
            }
        }
        best
    }

    /// Nearest category for a centroid vector, e.g. to name a fresh cluster.
    pub fn nearest_category(&self, embedding: &[f32]) -> Option<(String, f32)> {
        self.categories
            .iter()
            .map(|c| (c.category.clone(), cosine_similarity(embedding, &c.centroid)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn categories(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.category.as_str()).collect()
    }

    pub fn intents(&self, category: &str) -> Vec<&str> {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.intents.iter().map(|i| i.intent.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c.category == category)
    }
}

fn mean(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut out = vec![0f32; first.len()];
    for v in vectors {
        for (slot, value) in out.iter_mut().zip(v.iter()) {
            *slot += value;
        }
    }
    let n = vectors.len() as f32;
    for slot in &mut out {
        *slot /= n;
    }
    out
}

/// Holder of the current snapshot.
pub struct IntentRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// The current snapshot; pin it for the duration of a query.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().expect("registry lock poisoned").clone()
    }

    /// Rebuilds from committed pairs: groups by (category, intent), embeds up
    /// to `examples_per_intent` questions per intent, and swaps the snapshot.
    pub async fn rebuild(
        &self,
        pairs: &[QAPair],
        embedder: &dyn Embedder,
    ) -> Result<(), PipelineError> {
        const EXAMPLES_PER_INTENT: usize = 5;

        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for pair in pairs {
            grouped
                .entry(pair.metadata.category.clone())
                .or_default()
                .entry(pair.metadata.intent.clone())
                .or_default()
                .push(pair.question.clone());
        }

        let mut categories = Vec::with_capacity(grouped.len());
        for (category, intents) in grouped {
            let mut entries = Vec::with_capacity(intents.len());
            for (intent, mut examples) in intents {
                examples.truncate(EXAMPLES_PER_INTENT);
                let refs: Vec<&str> = examples.iter().map(String::as_str).collect();
                let vectors = embedder.embed(&refs).await?;
                entries.push(IntentEntry {
                    intent,
                    exemplar: mean(&vectors),
                    examples,
                });
            }
            let centroid = mean(
                &entries
                    .iter()
                    .map(|e| e.exemplar.clone())
                    .collect::<Vec<_>>(),
            );
            categories.push(CategoryEntry {
                category,
                intents: entries,
                centroid,
            });
        }

        let previous_version = self.snapshot().version;
        let snapshot = Arc::new(RegistrySnapshot {
            categories,
            version: previous_version + 1,
            built_at: Some(Utc::now()),
        });
        *self.current.write().expect("registry lock poisoned") = snapshot;
        Ok(())
    }
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::model::PairMetadata;

    fn pair(question: &str, category: &str, intent: &str) -> QAPair {
        QAPair {
            id: format!("qa_{}", question.len()),
            question: question.into(),
            answer: "answer".into(),
            metadata: PairMetadata {
                category: category.into(),
                intent: intent.into(),
                confidence: 0.9,
                ..Default::default()
            },
        }
    }

    /// **Scenario**: Rebuild groups pairs and classification finds the right
    /// intent for a known question.
    #[tokio::test]
    async fn rebuild_and_classify() {
        let registry = IntentRegistry::new();
        let embedder = MockEmbedder::new(64);
        let pairs = vec![
            pair("how do i reset my password", "account", "password_reset"),
            pair("forgot my password help", "account", "password_reset"),
            pair("where is my refund", "billing", "refund_status"),
        ];
        registry.rebuild(&pairs, &embedder).await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.categories().len(), 2);
        assert_eq!(snapshot.intents("account"), vec!["password_reset"]);

        let q = embedder.embed(&["how do i reset my password"]).await.unwrap();
        let hit = snapshot.classify(&q[0]).unwrap();
        assert_eq!(hit.category, "account");
        assert_eq!(hit.intent, "password_reset");
    }

    /// **Scenario**: Readers holding the old snapshot are unaffected by a
    /// rebuild; the version increments.
    #[tokio::test]
    async fn snapshot_pinning() {
        let registry = IntentRegistry::new();
        let embedder = MockEmbedder::new(64);
        let pinned = registry.snapshot();
        registry
            .rebuild(&[pair("q", "c", "i")], &embedder)
            .await
            .unwrap();
        assert_eq!(pinned.version, 0);
        assert!(pinned.categories.is_empty());
        assert_eq!(registry.snapshot().version, 1);
    }

    /// **Scenario**: An empty registry classifies nothing.
    #[test]
    fn empty_registry() {
        let snapshot = RegistrySnapshot::default();
        assert!(snapshot.classify(&[1.0, 0.0]).is_none());
        assert!(snapshot.categories().is_empty());
    }
}
