//! # Tether
//!
//! A retrieval-augmented question-answering core for customer-support
//! knowledge bases. Tether grounds model answers in a curated corpus of
//! question/answer pairs and escalates to humans when groundedness cannot be
//! achieved. Three subsystems make up the core:
//!
//! 1. **The query pipeline** — a staged graph of typed nodes with strict I/O
//!    contracts ([`NodeContract`]), state projection and per-field reducers
//!    over a single shared [`QueryState`], conditional routing, a cache
//!    short-circuit, and a hybrid retrieval + rerank + multi-hop search core.
//! 2. **Ingestion** — a two-phase staging/commit workflow: uploads are parsed
//!    and auto-classified (two-level k-means + handoff detection) into
//!    [`StagingDraft`]s for human review, then committed atomically into the
//!    relational and vector stores.
//! 3. **Webhooks** — at-least-once delivery of signed events with
//!    exponential-backoff retries and a dead-letter view.
//!
//! ## Design principles
//!
//! - **State-in, state-out**: one typed state flows through the pipeline;
//!   nodes see only their declared inputs and return patches validated
//!   against their declared outputs.
//! - **Capability traits at the seams**: stores ([`RelationalStore`],
//!   [`VectorStore`], [`KvStore`]), model clients ([`ChatClient`],
//!   [`Embedder`]), the reranker, and the webhook transport are traits with
//!   mock implementations for tests.
//! - **No globals**: everything a node needs arrives in an immutable
//!   [`PipelineContext`]; registry and lexical snapshots are pinned per query
//!   and swapped atomically on refresh.
//!
//! ## Main modules
//!
//! - [`pipeline`]: [`TetherService`], the assembled service facade, and
//!   [`default_pipeline`].
//! - [`graph`]: [`PipelineGraph`], [`CompiledPipeline`], [`PipelineNode`],
//!   [`Next`], [`PipelineContext`].
//! - [`node`]: the node library (guardrails, cache, classify, retrieve, fuse,
//!   rerank, multi-hop, dialog, route, generate, archive).
//! - [`state`] / [`contract`] / [`reducers`]: the typed shared state and its
//!   contracts.
//! - [`search`]: BM25 index, reciprocal-rank fusion, rerank seam.
//! - [`cache`]: the normalized-query answer cache.
//! - [`ingest`]: parsing, staging, classification, commit.
//! - [`webhook`]: events, subscriptions, signing, the dispatcher.
//! - [`session`]: conversation logs and per-user memory.
//! - [`store`]: capability traits plus in-memory and SQLite backends.
//! - [`llm`]: chat/embedding clients and rate limiting.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::{
//!     config::ServiceConfig, llm::{MockChat, MockEmbedder},
//!     pipeline::{QueryRequest, TetherService},
//!     store::{InMemoryKvStore, InMemoryRelationalStore, InMemoryVectorStore},
//!     webhook::HttpTransport,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tether::error::PipelineError> {
//! let mut config = ServiceConfig::default();
//! config.cache.semantic_threshold = Some(0.9);
//!
//! let service = TetherService::new(
//!     config,
//!     Arc::new(MockChat::new("grounded answer")),
//!     Arc::new(MockEmbedder::new(64)),
//!     Arc::new(InMemoryRelationalStore::new()),
//!     Arc::new(InMemoryVectorStore::new()),
//!     Arc::new(InMemoryKvStore::new()),
//!     Arc::new(HttpTransport::new()),
//! )
//! .await?;
//!
//! let record = service
//!     .query(QueryRequest {
//!         question: "How do I reset my password?".into(),
//!         user_id: "u1".into(),
//!         session_id: None,
//!     })
//!     .await?;
//! println!("{:?} {:?}", record.action, record.answer);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod contract;
pub mod dialog;
pub mod error;
pub mod graph;
pub mod guardrails;
pub mod ingest;
pub mod llm;
pub mod message;
pub mod model;
pub mod multihop;
pub mod node;
pub mod pipeline;
pub mod prompts;
pub mod reducers;
pub mod registry;
pub mod search;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{normalize_query, AnswerCache};
pub use config::ServiceConfig;
pub use contract::NodeContract;
pub use dialog::DialogState;
pub use error::{ErrorKind, NodeError, PipelineError};
pub use graph::{CompiledPipeline, Next, PipelineContext, PipelineGraph, PipelineNode};
pub use ingest::{ChunkEdit, CommitOutcome, StagingDraft, UploadFile};
pub use llm::{ChatClient, ChatOpenAI, Embedder, MockChat, MockEmbedder, OpenAIEmbedder};
pub use message::Message;
pub use model::{CacheEntry, Document, QAPair, QueryRecord, RouteAction, ScoredPair};
pub use pipeline::{default_pipeline, QueryRequest, SearchRequest, TetherService};
pub use prompts::{PromptSet, REFUSAL_TOKEN};
pub use registry::IntentRegistry;
pub use search::{LexicalIndex, Reranker, SearchHit};
pub use session::{Session, SessionManager};
pub use state::{Field, QueryState};
pub use store::{
    InMemoryKvStore, InMemoryRelationalStore, InMemoryVectorStore, KvStore, RelationalStore,
    SqliteRelationalStore, SqliteVecStore, VectorFilter, VectorStore,
};
pub use telemetry::QueryTelemetry;
pub use webhook::{
    DeliveryPolicy, DeliveryStatus, HttpTransport, MockTransport, WebhookDispatcher,
    WebhookSubscription,
};
