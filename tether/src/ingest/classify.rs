//! Auto-classification of staged chunks: two-level clustering, cluster
//! naming, and handoff detection.
//!
//! Questions are embedded in batch, clustered with k-means (k = configured
//! category count), and each cluster is clustered again for intents. Cluster
//! names come from the registry when a centroid lands close enough to an
//! existing category (exact-match first by construction, nearest-centroid
//! otherwise), else from a one-shot model prompt. Handoff detection is a
//! bilingual keyword score with a model tie-break inside the indecisive band.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::config::IngestSettings;
use crate::error::PipelineError;
use crate::llm::{ChatClient, ChatOptions, Embedder};
use crate::registry::RegistrySnapshot;
use crate::search::tokenize;

use super::kmeans::kmeans;
use super::staging::StagingChunk;

/// Keyword weights; the score is the weighted hit count normalized by 3.
static HANDOFF_KEYWORDS: Lazy<Vec<(&'static str, f32)>> = Lazy::new(|| {
    vec![
        ("human", 1.0),
        ("agent", 1.0),
        ("representative", 1.0),
        ("lawyer", 1.5),
        ("legal", 1.0),
        ("complaint", 1.0),
        ("urgent", 0.8),
        ("emergency", 1.2),
        ("lawsuit", 1.5),
        ("fraud", 1.2),
        ("persona", 1.0),
        ("agente", 1.0),
        ("abogado", 1.5),
        ("queja", 1.0),
        ("urgente", 0.8),
        ("fraude", 1.2),
        ("demanda", 1.2),
    ]
    .into_iter()
    .collect()
});

/// Bilingual keyword score in [0, 1].
pub fn handoff_keyword_score(text: &str) -> f32 {
    let tokens = tokenize(text);
    let mut score = 0f32;
    for (keyword, weight) in HANDOFF_KEYWORDS.iter() {
        if tokens.iter().any(|t| t == keyword) {
            score += weight;
        }
    }
    (score / 3.0).min(1.0)
}

/// How many chunks were touched by each classification stage.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClassificationStats {
    pub chunks: usize,
    pub categories_assigned: usize,
    pub intents_assigned: usize,
    pub handoff_flagged: usize,
    pub handoff_model_calls: usize,
}

/// Runs the auto-classification pass over parsed chunks.
pub struct Classifier {
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatClient>,
    settings: IngestSettings,
}

impl Classifier {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatClient>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            embedder,
            chat,
            settings,
        }
    }

    /// Names a cluster: nearest registry category when close enough, else a
    /// one-shot model prompt over exemplar questions, else a positional name.
    async fn name_category(
        &self,
        registry: &RegistrySnapshot,
        centroid: &[f32],
        exemplars: &[&str],
        index: usize,
    ) -> String {
        const REGISTRY_MATCH_FLOOR: f32 = 0.7;
        if let Some((category, score)) = registry.nearest_category(centroid) {
            if score >= REGISTRY_MATCH_FLOOR {
                return category;
            }
        }
        let prompt = format!(
            "These customer questions belong to one support category. Reply with a short lowercase snake_case name for the category and nothing else.\n\n{}",
            exemplars.join("\n")
        );
        match self
            .chat
            .chat(
                "You name support categories. Reply with one snake_case token.",
                &[crate::message::Message::user(prompt)],
                &ChatOptions::default(),
            )
            .await
        {
            Ok(reply) => {
                let name = reply
                    .trim()
                    .to_lowercase()
                    .replace(|c: char| !c.is_alphanumeric() && c != '_', "_");
                if name.is_empty() {
                    format!("topic_{}", index + 1)
                } else {
                    name
                }
            }
            Err(e) => {
                debug!(error = %e, "cluster naming fell back to positional name");
                format!("topic_{}", index + 1)
            }
        }
    }

    /// Decides handoff for one chunk: keyword score outside the band decides
    /// directly; inside it, the model breaks the tie.
    async fn decide_handoff(&self, chunk: &StagingChunk, stats: &mut ClassificationStats) -> (bool, f32) {
        let score = handoff_keyword_score(&format!("{} {}", chunk.question, chunk.answer));
        if score < self.settings.handoff_low {
            return (false, score);
        }
        if score > self.settings.handoff_high {
            return (true, score);
        }
        stats.handoff_model_calls += 1;
        let prompt = format!(
            "Does resolving this customer question require a human agent rather than an automated answer? Reply yes or no.\n\nQ: {}\nA: {}",
            chunk.question, chunk.answer
        );
        match self
            .chat
            .chat(
                "You triage support questions. Reply with exactly yes or no.",
                &[crate::message::Message::user(prompt)],
                &ChatOptions::default(),
            )
            .await
        {
            Ok(reply) => (reply.trim().to_lowercase().starts_with("yes"), score),
            // An undecidable chunk defaults to handoff; review can clear it.
            Err(_) => (true, score),
        }
    }

    /// Classifies chunks in place. Chunks that arrived with a category keep
    /// it; clustering fills the blanks.
    pub async fn classify(
        &self,
        registry: &RegistrySnapshot,
        chunks: &mut [StagingChunk],
    ) -> Result<ClassificationStats, PipelineError> {
        let mut stats = ClassificationStats {
            chunks: chunks.len(),
            ..Default::default()
        };
        if chunks.is_empty() {
            return Ok(stats);
        }

        let questions: Vec<&str> = chunks.iter().map(|c| c.question.as_str()).collect();
        let embeddings = self.embedder.embed(&questions).await?;

        let (assignments, centroids) = kmeans(
            &embeddings,
            self.settings.n_categories,
            25,
            0xC1A551F1,
        );

        // Name each category cluster once.
        let mut category_names = Vec::with_capacity(centroids.len());
        for (cluster, centroid) in centroids.iter().enumerate() {
            let exemplars: Vec<&str> = chunks
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == cluster)
                .take(5)
                .map(|(c, _)| c.question.as_str())
                .collect();
            if exemplars.is_empty() {
                category_names.push(format!("topic_{}", cluster + 1));
                continue;
            }
            category_names.push(
                self.name_category(registry, centroid, &exemplars, cluster)
                    .await,
            );
        }

        // Second level: intents within each category cluster.
        for cluster in 0..centroids.len() {
            let member_indices: Vec<usize> = assignments
                .iter()
                .enumerate()
                .filter(|(_, a)| **a == cluster)
                .map(|(i, _)| i)
                .collect();
            if member_indices.is_empty() {
                continue;
            }
            let member_vectors: Vec<Vec<f32>> = member_indices
                .iter()
                .map(|&i| embeddings[i].clone())
                .collect();
            let (intent_assignments, _) = kmeans(
                &member_vectors,
                self.settings.m_intents_per_category,
                15,
                0x1B7E57 + cluster as u64,
            );

            for (position, &chunk_index) in member_indices.iter().enumerate() {
                let chunk = &mut chunks[chunk_index];
                let intent_cluster = intent_assignments[position];
                if chunk.category.is_empty() {
                    chunk.category = category_names[cluster].clone();
                    chunk.scores.category_confidence = 0.7;
                    stats.categories_assigned += 1;
                } else {
                    chunk.scores.category_confidence = 1.0;
                }
                if chunk.intent.is_empty() {
                    chunk.intent =
                        format!("{}_{}", category_names[cluster], intent_cluster + 1);
                    chunk.scores.intent_confidence = 0.6;
                    stats.intents_assigned += 1;
                } else {
                    chunk.scores.intent_confidence = 1.0;
                }
            }
        }

        // Handoff detection per chunk.
        for chunk in chunks.iter_mut() {
            let (handoff, score) = self.decide_handoff(chunk, &mut stats).await;
            chunk.requires_handoff = handoff;
            chunk.scores.handoff_score = score;
            if handoff {
                stats.handoff_flagged += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestSettings;
    use crate::ingest::staging::ChunkScores;
    use crate::llm::{MockChat, MockEmbedder};
    use crate::model::Language;

    fn chunk(question: &str, answer: &str) -> StagingChunk {
        StagingChunk {
            chunk_id: format!("c#{}", question.len()),
            question: question.into(),
            answer: answer.into(),
            category: String::new(),
            intent: String::new(),
            language: Language::En,
            requires_handoff: false,
            scores: ChunkScores::default(),
            source_file: "faq.json".into(),
        }
    }

    fn classifier(chat_reply: &str) -> Classifier {
        Classifier::new(
            Arc::new(MockEmbedder::new(64)),
            Arc::new(MockChat::new(chat_reply)),
            IngestSettings {
                n_categories: 2,
                m_intents_per_category: 2,
                ..Default::default()
            },
        )
    }

    /// **Scenario**: Blank categories and intents are filled; provided ones
    /// are kept with full confidence.
    #[tokio::test]
    async fn fills_blank_classifications() {
        let mut chunks = vec![
            chunk("How do I reset my password?", "Use the link."),
            chunk("Where is my refund?", "Within 14 days."),
            {
                let mut c = chunk("How long is shipping?", "3 to 5 days.");
                c.category = "shipping".into();
                c.intent = "delivery_time".into();
                c
            },
        ];
        let stats = classifier("account_questions")
            .classify(&RegistrySnapshot::default(), &mut chunks)
            .await
            .unwrap();

        assert_eq!(stats.chunks, 3);
        assert!(chunks.iter().all(|c| !c.category.is_empty()));
        assert!(chunks.iter().all(|c| !c.intent.is_empty()));
        assert_eq!(chunks[2].category, "shipping");
        assert_eq!(chunks[2].scores.category_confidence, 1.0);
        assert_eq!(stats.categories_assigned, 2);
    }

    /// **Scenario**: Obvious handoff keywords flag without a model call; the
    /// indecisive band asks the model.
    #[tokio::test]
    async fn handoff_detection_band() {
        // "lawyer" + "lawsuit" (1.5 + 1.5) / 3 = 1.0 > high band.
        let mut obvious = vec![chunk(
            "I want my lawyer to file a lawsuit about this",
            "Please wait.",
        )];
        let c = classifier("no");
        let stats = c
            .classify(&RegistrySnapshot::default(), &mut obvious)
            .await
            .unwrap();
        assert!(obvious[0].requires_handoff);
        assert_eq!(stats.handoff_model_calls, 0);

        // A single mid-weight keyword lands inside the band; the model says no.
        let mut borderline = vec![chunk("This is urgent, where is my order?", "On its way.")];
        let stats = c
            .classify(&RegistrySnapshot::default(), &mut borderline)
            .await
            .unwrap();
        assert_eq!(stats.handoff_model_calls, 1);
        assert!(!borderline[0].requires_handoff);
    }

    /// **Scenario**: Plain questions score zero and skip the model entirely.
    #[test]
    fn keyword_score_zero_for_plain_text() {
        assert_eq!(handoff_keyword_score("How do I reset my password?"), 0.0);
        assert!(handoff_keyword_score("necesito un abogado urgente") > 0.6);
    }
}
