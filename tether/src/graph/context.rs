//! Execution context handed to every node.
//!
//! Model clients, stores, the answer cache, and the read-only snapshots are
//! injected here once per query; there are no globals. Registry and lexical
//! snapshots are pinned at query start, so a concurrent refresh never tears
//! a running query.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::cache::AnswerCache;
use crate::config::ServiceConfig;
use crate::llm::{ChatClient, Embedder};
use crate::registry::RegistrySnapshot;
use crate::search::{LexicalSnapshot, Reranker};
use crate::store::{KvStore, RelationalStore, VectorStore};
use crate::telemetry::NodeRun;

/// Immutable per-query context.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<ServiceConfig>,
    pub chat: Arc<dyn ChatClient>,
    pub embedder: Arc<dyn Embedder>,
    pub relational: Arc<dyn RelationalStore>,
    pub vector: Arc<dyn VectorStore>,
    pub kv: Arc<dyn KvStore>,
    pub cache: Arc<AnswerCache>,
    /// Intent registry snapshot pinned for this query.
    pub registry: Arc<RegistrySnapshot>,
    /// Lexical index snapshot pinned for this query.
    pub lexical: Arc<LexicalSnapshot>,
    pub reranker: Arc<dyn Reranker>,
    pub cancel: CancellationToken,
    /// Query deadline; node timeouts are clamped to the remaining budget.
    pub deadline: Option<Instant>,
    /// When the query entered the pipeline.
    pub started: Instant,
    /// Node runs recorded so far. The engine appends after every node, so the
    /// archive step can persist telemetry for everything that ran before it.
    /// One context serves exactly one query.
    pub telemetry: Arc<Mutex<Vec<NodeRun>>>,
}

impl PipelineContext {
    /// Snapshot of the node runs recorded so far.
    pub fn telemetry_so_far(&self) -> Vec<NodeRun> {
        self.telemetry.lock().expect("telemetry lock poisoned").clone()
    }

    /// Time left before the query deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the query was cancelled or ran out of deadline.
    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().map_or(false, |r| r.is_zero())
    }
}
