//! Staging drafts: transient, human-reviewable bundles of candidate pairs.
//!
//! Drafts live in the K/V store under a TTL and are never visible to the
//! query pipeline. Review edits are idempotent on `chunk_id`: applying the
//! same patch twice leaves the draft unchanged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::model::Language;
use crate::store::{KvStore, StoreError};

/// Auto-classification confidence scores attached to each chunk.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChunkScores {
    pub category_confidence: f32,
    pub intent_confidence: f32,
    pub handoff_score: f32,
}

/// One candidate pair under review.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StagingChunk {
    pub chunk_id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub intent: String,
    pub language: Language,
    pub requires_handoff: bool,
    pub scores: ChunkScores,
    pub source_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Pending,
    Reviewed,
    Committed,
    Discarded,
}

/// A staged upload awaiting review and commit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StagingDraft {
    pub draft_id: String,
    pub source: String,
    pub chunks: Vec<StagingChunk>,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
}

/// A review operation. All variants are idempotent by chunk id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChunkEdit {
    /// Adds (or replaces, same id) a chunk.
    Add { chunk: StagingChunk },
    /// Edits fields of an existing chunk; absent fields are untouched.
    Edit {
        chunk_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requires_handoff: Option<bool>,
    },
    /// Splits a chunk's answer in two at a marker string; the second half
    /// becomes a new chunk with the given id.
    Split {
        chunk_id: String,
        at: String,
        new_chunk_id: String,
        new_question: String,
    },
    /// Merges the sources' answers into the target; sources are removed.
    Merge {
        target_chunk_id: String,
        source_chunk_ids: Vec<String>,
    },
    /// Reassigns category/intent.
    Reassign {
        chunk_id: String,
        category: String,
        intent: String,
    },
    /// Removes a chunk.
    Remove { chunk_id: String },
}

fn apply_edit(draft: &mut StagingDraft, edit: &ChunkEdit) {
    match edit {
        ChunkEdit::Add { chunk } => {
            if let Some(existing) = draft
                .chunks
                .iter_mut()
                .find(|c| c.chunk_id == chunk.chunk_id)
            {
                *existing = chunk.clone();
            } else {
                draft.chunks.push(chunk.clone());
            }
        }
        ChunkEdit::Edit {
            chunk_id,
            question,
            answer,
            requires_handoff,
        } => {
            if let Some(chunk) = draft.chunks.iter_mut().find(|c| &c.chunk_id == chunk_id) {
                if let Some(q) = question {
                    chunk.question = q.clone();
                }
                if let Some(a) = answer {
                    chunk.answer = a.clone();
                }
                if let Some(h) = requires_handoff {
                    chunk.requires_handoff = *h;
                }
            }
        }
        ChunkEdit::Split {
            chunk_id,
            at,
            new_chunk_id,
            new_question,
        } => {
            // Already-split drafts have the new id; applying again is a no-op.
            if draft.chunks.iter().any(|c| &c.chunk_id == new_chunk_id) {
                return;
            }
            let Some(index) = draft.chunks.iter().position(|c| &c.chunk_id == chunk_id) else {
                return;
            };
            let Some(split_at) = draft.chunks[index].answer.find(at.as_str()) else {
                return;
            };
            let rest = draft.chunks[index].answer.split_off(split_at);
            let rest = rest[at.len()..].trim().to_string();
            let mut new_chunk = draft.chunks[index].clone();
            new_chunk.chunk_id = new_chunk_id.clone();
            new_chunk.question = new_question.clone();
            new_chunk.answer = rest;
            draft.chunks[index].answer = draft.chunks[index].answer.trim().to_string();
            draft.chunks.insert(index + 1, new_chunk);
        }
        ChunkEdit::Merge {
            target_chunk_id,
            source_chunk_ids,
        } => {
            let mut merged_answers = Vec::new();
            for source_id in source_chunk_ids {
                if let Some(pos) = draft.chunks.iter().position(|c| &c.chunk_id == source_id) {
                    merged_answers.push(draft.chunks.remove(pos).answer);
                }
            }
            if let Some(target) = draft
                .chunks
                .iter_mut()
                .find(|c| &c.chunk_id == target_chunk_id)
            {
                for answer in merged_answers {
                    target.answer.push_str("\n");
                    target.answer.push_str(&answer);
                }
            }
        }
        ChunkEdit::Reassign {
            chunk_id,
            category,
            intent,
        } => {
            if let Some(chunk) = draft.chunks.iter_mut().find(|c| &c.chunk_id == chunk_id) {
                chunk.category = category.clone();
                chunk.intent = intent.clone();
            }
        }
        ChunkEdit::Remove { chunk_id } => {
            draft.chunks.retain(|c| &c.chunk_id != chunk_id);
        }
    }
}

fn draft_key(draft_id: &str) -> String {
    format!("draft:{}", draft_id)
}

/// Draft persistence over the K/V store.
pub struct StagingStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl StagingStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub async fn create(
        &self,
        source: &str,
        chunks: Vec<StagingChunk>,
    ) -> Result<StagingDraft, PipelineError> {
        let draft = StagingDraft {
            draft_id: format!("drf_{}", uuid::Uuid::new_v4().simple()),
            source: source.to_string(),
            chunks,
            status: DraftStatus::Pending,
            created_at: Utc::now(),
        };
        self.save(&draft).await?;
        Ok(draft)
    }

    pub async fn save(&self, draft: &StagingDraft) -> Result<(), PipelineError> {
        self.kv
            .set(
                &draft_key(&draft.draft_id),
                &serde_json::to_string(draft).map_err(StoreError::from)?,
                Some(self.ttl),
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, draft_id: &str) -> Result<StagingDraft, PipelineError> {
        let raw = self
            .kv
            .get(&draft_key(draft_id))
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("draft {}", draft_id)))?;
        Ok(serde_json::from_str(&raw).map_err(StoreError::from)?)
    }

    pub async fn list(&self, status: Option<DraftStatus>) -> Result<Vec<StagingDraft>, PipelineError> {
        let mut drafts = Vec::new();
        for (_, raw) in self.kv.scan_prefix("draft:").await? {
            let draft: StagingDraft = serde_json::from_str(&raw).map_err(StoreError::from)?;
            if status.map_or(true, |s| draft.status == s) {
                drafts.push(draft);
            }
        }
        drafts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(drafts)
    }

    /// Applies review edits. Committed and discarded drafts are immutable.
    pub async fn patch(
        &self,
        draft_id: &str,
        edits: &[ChunkEdit],
    ) -> Result<StagingDraft, PipelineError> {
        let mut draft = self.get(draft_id).await?;
        if matches!(draft.status, DraftStatus::Committed | DraftStatus::Discarded) {
            return Err(PipelineError::Validation(format!(
                "draft {} is {:?} and cannot be edited",
                draft_id, draft.status
            )));
        }
        for edit in edits {
            apply_edit(&mut draft, edit);
        }
        draft.status = DraftStatus::Reviewed;
        self.save(&draft).await?;
        Ok(draft)
    }

    pub async fn discard(&self, draft_id: &str) -> Result<(), PipelineError> {
        let mut draft = self.get(draft_id).await?;
        draft.status = DraftStatus::Discarded;
        self.save(&draft).await
    }
}
