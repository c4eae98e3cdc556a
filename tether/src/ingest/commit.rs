//! Draft commit: the atomic transition into the authoritative stores.
//!
//! Ordered, recoverable procedure under a per-draft advisory lock:
//! 1. assign stable pair ids; 2. insert pairs relationally (transaction);
//! 3. embed and upsert vectors; on failure a compensating delete rolls back
//! step 2; 4. refresh the intent registry and lexical index; 5. emit one
//! `document.ingested` event per source file; 6. mark the draft committed.
//! Query readers see either all of a draft's pairs or none.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use chrono::Utc;

use crate::error::PipelineError;
use crate::llm::Embedder;
use crate::model::{Document, DocumentStatus, PairMetadata, QAPair};
use crate::registry::IntentRegistry;
use crate::search::LexicalIndex;
use crate::store::{KvStore, RelationalStore, VectorRecord, VectorStore};
use crate::webhook::{WebhookDispatcher, DOCUMENT_INGESTED, SYSTEM_REGISTRY_REFRESHED};

use super::staging::{DraftStatus, StagingStore};

/// Result of a commit: how many pairs landed and which chunks failed
/// validation (and were skipped).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommitOutcome {
    pub committed_count: usize,
    pub failures: Vec<String>,
}

/// Executes commits. One committer is shared by the service; the advisory
/// lock serializes commits per draft id.
pub struct Committer {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    kv: Arc<dyn KvStore>,
    embedder: Arc<dyn Embedder>,
    registry: Arc<IntentRegistry>,
    lexical: Arc<LexicalIndex>,
    staging: Arc<StagingStore>,
    dispatcher: Arc<WebhookDispatcher>,
}

const LOCK_TTL: Duration = Duration::from_secs(120);

impl Committer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        kv: Arc<dyn KvStore>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<IntentRegistry>,
        lexical: Arc<LexicalIndex>,
        staging: Arc<StagingStore>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            relational,
            vector,
            kv,
            embedder,
            registry,
            lexical,
            staging,
            dispatcher,
        }
    }

    /// Commits a draft using its current (post-patch) metadata verbatim;
    /// classification is not re-run. Returns `CommitConflict` while another
    /// commit holds the draft's lock.
    pub async fn commit(&self, draft_id: &str) -> Result<CommitOutcome, PipelineError> {
        let lock_key = format!("commit_lock:{}", draft_id);
        if !self.kv.set_nx(&lock_key, "1", Some(LOCK_TTL)).await? {
            return Err(PipelineError::CommitConflict(draft_id.to_string()));
        }
        let result = self.commit_locked(draft_id).await;
        let _ = self.kv.delete(&lock_key).await;
        result
    }

    async fn commit_locked(&self, draft_id: &str) -> Result<CommitOutcome, PipelineError> {
        let mut draft = self.staging.get(draft_id).await?;
        match draft.status {
            DraftStatus::Committed => {
                return Err(PipelineError::AlreadyExists(format!(
                    "draft {} is already committed",
                    draft_id
                )))
            }
            DraftStatus::Discarded => {
                return Err(PipelineError::Validation(format!(
                    "draft {} was discarded",
                    draft_id
                )))
            }
            DraftStatus::Pending | DraftStatus::Reviewed => {}
        }

        // Step 1: stable pair ids, skipping chunks that fail validation.
        let mut pairs = Vec::new();
        let mut failures = Vec::new();
        for chunk in &draft.chunks {
            let pair = QAPair {
                id: format!("qa_{}", uuid::Uuid::new_v4().simple()),
                question: chunk.question.clone(),
                answer: chunk.answer.clone(),
                metadata: PairMetadata {
                    category: chunk.category.clone(),
                    intent: chunk.intent.clone(),
                    requires_handoff: chunk.requires_handoff,
                    language: chunk.language,
                    confidence: chunk.scores.category_confidence.clamp(0.0, 1.0),
                    source_document: Some(chunk.source_file.clone()),
                    see_also: Vec::new(),
                    tags: Default::default(),
                },
            };
            match pair.validate() {
                Ok(()) => pairs.push(pair),
                Err(e) => failures.push(format!("{}: {}", chunk.chunk_id, e)),
            }
        }
        if pairs.is_empty() {
            return Err(PipelineError::Validation(format!(
                "draft {} has no committable chunks",
                draft_id
            )));
        }

        // Step 2: relational insert, transactional.
        self.relational.insert_pairs(&pairs).await?;
        let pair_ids: Vec<String> = pairs.iter().map(|p| p.id.clone()).collect();

        // Step 3: embeddings into the vector store; compensate on failure.
        match self.embed_and_upsert(&pairs).await {
            Ok(()) => {}
            Err(e) => {
                warn!(draft_id = %draft_id, error = %e, "vector step failed, rolling back relational insert");
                self.relational.delete_pairs(&pair_ids).await?;
                return Err(e);
            }
        }

        // Step 4: refresh the registry and the lexical index from committed
        // state. Idempotent; a crash before this point is recovered by the
        // compensating delete, after it by re-running commit on a fresh draft.
        let all_pairs = self.relational.list_active_pairs().await?;
        self.registry
            .rebuild(&all_pairs, self.embedder.as_ref())
            .await?;
        self.lexical.rebuild(&all_pairs);
        self.dispatcher
            .emit(
                SYSTEM_REGISTRY_REFRESHED,
                serde_json::json!({ "pair_count": all_pairs.len() }),
            )
            .await?;

        // Step 5: a document row and one event per source document.
        let mut sources: Vec<&str> = draft.chunks.iter().map(|c| c.source_file.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        for source in sources {
            let source_pair_ids: Vec<String> = pairs
                .iter()
                .filter(|p| p.metadata.source_document.as_deref() == Some(source))
                .map(|p| p.id.clone())
                .collect();
            let document = Document {
                id: format!("doc_{}", uuid::Uuid::new_v4().simple()),
                title: source.to_string(),
                pair_ids: source_pair_ids.clone(),
                status: DocumentStatus::Active,
                version: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.relational.insert_document(&document).await?;
            self.dispatcher
                .emit(
                    DOCUMENT_INGESTED,
                    serde_json::json!({
                        "draft_id": draft_id,
                        "document_id": document.id,
                        "source": source,
                        "pair_count": source_pair_ids.len(),
                    }),
                )
                .await?;
        }

        // Step 6: mark committed; the K/V TTL handles deletion.
        draft.status = DraftStatus::Committed;
        self.staging.save(&draft).await?;

        info!(
            draft_id = %draft_id,
            committed = pairs.len(),
            failures = failures.len(),
            "draft committed"
        );
        Ok(CommitOutcome {
            committed_count: pairs.len(),
            failures,
        })
    }

    async fn embed_and_upsert(&self, pairs: &[QAPair]) -> Result<(), PipelineError> {
        let texts: Vec<String> = pairs.iter().map(|p| p.searchable_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs).await?;
        if vectors.len() != pairs.len() {
            return Err(PipelineError::Upstream(
                "embedder returned a short batch".into(),
            ));
        }
        let records: Vec<VectorRecord> = pairs
            .iter()
            .zip(vectors)
            .map(|(pair, vector)| VectorRecord {
                pair_id: pair.id.clone(),
                vector,
                category: pair.metadata.category.clone(),
                intent: pair.metadata.intent.clone(),
                language: pair.metadata.language,
                model: self.embedder.model_id().to_string(),
            })
            .collect();
        Ok(self.vector.upsert(&records).await?)
    }
}
