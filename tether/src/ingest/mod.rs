//! Ingestion: upload parsing, staging, auto-classification, and commit.
//!
//! Two-phase workflow: `stage` parses uploads into candidate chunks, runs
//! auto-classification, and writes a `StagingDraft` into the K/V store with a
//! TTL. Drafts are invisible to the query pipeline. Human review patches
//! chunks idempotently by chunk id; `commit` moves the draft's pairs into the
//! authoritative stores under a per-draft advisory lock, with a compensating
//! delete if the vector step fails. Readers see all of a draft's pairs or
//! none.

mod classify;
mod commit;
mod kmeans;
mod parse;
mod staging;

pub use classify::{ClassificationStats, Classifier};
pub use commit::{CommitOutcome, Committer};
pub use kmeans::kmeans;
pub use parse::{parse_upload, UploadFile};
pub use staging::{
    ChunkEdit, ChunkScores, DraftStatus, StagingChunk, StagingDraft, StagingStore,
};
