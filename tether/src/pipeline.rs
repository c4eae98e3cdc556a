//! Default pipeline wiring and the service facade.
//!
//! `default_pipeline` assembles the node library in the standard order;
//! `TetherService` owns the components, runs queries through the compiled
//! pipeline (one task per query, per-session serial turns), and exposes the
//! search, ingestion, webhook, and session surfaces consumed by the external
//! HTTP/adapter layers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::AnswerCache;
use crate::config::ServiceConfig;
use crate::error::PipelineError;
use crate::graph::{CompiledPipeline, PipelineContext, PipelineGraph};
use crate::guardrails::{InputGuardrails, OutputGuardrails};
use crate::ingest::{
    parse_upload, ChunkEdit, Classifier, CommitOutcome, Committer, DraftStatus, StagingDraft,
    StagingStore, UploadFile,
};
use crate::llm::{ChatClient, Embedder};
use crate::message::Message;
use crate::model::{QueryRecord, RouteAction};
use crate::node::{
    ArchiveNode, CacheLookupNode, CacheStoreNode, ComplexityNode, ContextMergeNode,
    DialogStateNode, ExpandNode, FuseNode, GenerateNode, InputGuardrailsNode, IntentNode,
    LanguageNode, LexicalRetrieveNode, MultiHopNode, OutputGuardrailsNode, RefusalNode,
    RerankNode, RetrievalFilterNode, RouteNode, VectorRetrieveNode,
};
use crate::prompts::PromptSet;
use crate::registry::IntentRegistry;
use crate::search::{apply_rerank, fuse, LexicalIndex, Reranker, SearchHit};
use crate::session::SessionManager;
use crate::store::{KvStore, RelationalStore, VectorFilter, VectorStore};
use crate::webhook::{
    DeliveryPolicy, DeliveryStatus, DeliveryTransport, WebhookConfig, WebhookDelivery,
    WebhookDispatcher, JOB_CLASSIFIED, QUERY_COMPLETED, SESSION_CLEARED, SESSION_CLOSED,
};

/// The default node order. Optional nodes (expand) may be disabled in config;
/// everything else is required.
pub const DEFAULT_ORDER: [&str; 20] = [
    "input_guardrails",
    "cache_lookup",
    "language",
    "intent",
    "retrieval_filter",
    "expand",
    "vector_retrieve",
    "lexical_retrieve",
    "fuse",
    "rerank",
    "complexity",
    "multi_hop",
    "context_merge",
    "dialog_state",
    "route",
    "generate",
    "output_guardrails",
    "refusal",
    "archive",
    "cache_store",
];

/// Builds the default query pipeline graph from config.
pub fn default_pipeline(
    config: &ServiceConfig,
    prompts: Arc<PromptSet>,
) -> Result<CompiledPipeline, PipelineError> {
    let mut graph = PipelineGraph::new(config.pipeline.clone());
    graph.add_node(Arc::new(InputGuardrailsNode::new(InputGuardrails::new(
        config.limits.clone(),
    ))));
    graph.add_node(Arc::new(CacheLookupNode));
    graph.add_node(Arc::new(LanguageNode));
    graph.add_node(Arc::new(IntentNode));
    graph.add_node(Arc::new(RetrievalFilterNode));
    graph.add_node(Arc::new(ExpandNode));
    graph.add_node(Arc::new(VectorRetrieveNode));
    graph.add_node(Arc::new(LexicalRetrieveNode));
    graph.add_node(Arc::new(FuseNode));
    graph.add_node(Arc::new(RerankNode));
    graph.add_node(Arc::new(ComplexityNode));
    graph.add_node(Arc::new(MultiHopNode));
    graph.add_node(Arc::new(ContextMergeNode));
    graph.add_node(Arc::new(DialogStateNode));
    graph.add_node(Arc::new(RouteNode));
    graph.add_node(Arc::new(GenerateNode::new(prompts.clone())));
    graph.add_node(Arc::new(OutputGuardrailsNode::new(OutputGuardrails::new(
        config.pipeline.groundedness_floor,
    ))));
    graph.add_node(Arc::new(RefusalNode::new(prompts)));
    graph.add_node(Arc::new(ArchiveNode));
    graph.add_node(Arc::new(CacheStoreNode));
    graph.set_order(DEFAULT_ORDER);
    graph
        .compile()
        .map_err(|e| PipelineError::Internal(format!("pipeline compile: {}", e)))
}

/// Input to [`TetherService::query`].
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: String,
    /// Defaults to `"default"` for single-session channels.
    pub session_id: Option<String>,
}

/// Input to [`TetherService::search`].
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub category: Option<String>,
}

/// The assembled service. Clone-free: share via `Arc`.
pub struct TetherService {
    config: Arc<ServiceConfig>,
    chat: Arc<dyn ChatClient>,
    embedder: Arc<dyn Embedder>,
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    kv: Arc<dyn KvStore>,
    cache: Arc<AnswerCache>,
    registry: Arc<IntentRegistry>,
    lexical: Arc<LexicalIndex>,
    reranker: Arc<dyn Reranker>,
    prompts: Arc<PromptSet>,
    sessions: SessionManager,
    staging: Arc<StagingStore>,
    classifier: Classifier,
    committer: Committer,
    dispatcher: Arc<WebhookDispatcher>,
    compiled: CompiledPipeline,
}

impl TetherService {
    /// Assembles the service: validates config, builds the answer cache, and
    /// warms the registry and lexical snapshots from committed pairs.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: ServiceConfig,
        chat: Arc<dyn ChatClient>,
        embedder: Arc<dyn Embedder>,
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        kv: Arc<dyn KvStore>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let config = Arc::new(config);
        let prompts = Arc::new(PromptSet::new());

        let cache = Arc::new(AnswerCache::new(
            kv.clone(),
            embedder.clone(),
            config.cache.clone(),
        )?);
        let registry = Arc::new(IntentRegistry::new());
        let lexical = Arc::new(LexicalIndex::empty());

        let pairs = relational.list_active_pairs().await?;
        if !pairs.is_empty() {
            registry.rebuild(&pairs, embedder.as_ref()).await?;
            lexical.rebuild(&pairs);
        }

        let reranker: Arc<dyn Reranker> =
            Arc::new(crate::search::EmbeddingReranker::new(embedder.clone()));
        let sessions = SessionManager::new(relational.clone(), kv.clone(), config.session.ttl());
        let staging = Arc::new(StagingStore::new(kv.clone(), config.ingest.draft_ttl()));
        let classifier = Classifier::new(embedder.clone(), chat.clone(), config.ingest.clone());

        let webhook_config = WebhookConfig {
            schedule: config
                .webhook
                .schedule_secs
                .iter()
                .map(|s| std::time::Duration::from_secs(*s))
                .collect(),
            jitter: config.webhook.jitter,
            max_concurrency: config.webhook.max_concurrency,
            default_timeout: std::time::Duration::from_secs(config.webhook.timeout_secs),
            skew: std::time::Duration::from_secs(config.webhook.skew_secs),
            tenant: config.webhook.tenant.clone(),
        };
        let dispatcher = WebhookDispatcher::new(
            relational.clone(),
            kv.clone(),
            transport,
            webhook_config,
        );

        let committer = Committer::new(
            relational.clone(),
            vector.clone(),
            kv.clone(),
            embedder.clone(),
            registry.clone(),
            lexical.clone(),
            staging.clone(),
            dispatcher.clone(),
        );

        let compiled = default_pipeline(&config, prompts.clone())?;

        Ok(Self {
            config,
            chat,
            embedder,
            relational,
            vector,
            kv,
            cache,
            registry,
            lexical,
            reranker,
            prompts,
            sessions,
            staging,
            classifier,
            committer,
            dispatcher,
            compiled,
        })
    }

    /// Swaps in a different reranker (e.g. the model-free lexical one for
    /// offline deployments).
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn dispatcher(&self) -> Arc<WebhookDispatcher> {
        self.dispatcher.clone()
    }

    fn make_context(&self) -> PipelineContext {
        let deadline = Instant::now() + self.config.pipeline.deadline();
        PipelineContext {
            config: self.config.clone(),
            chat: self.chat.clone(),
            embedder: self.embedder.clone(),
            relational: self.relational.clone(),
            vector: self.vector.clone(),
            kv: self.kv.clone(),
            cache: self.cache.clone(),
            registry: self.registry.snapshot(),
            lexical: self.lexical.snapshot(),
            reranker: self.reranker.clone(),
            cancel: CancellationToken::new(),
            deadline: Some(deadline),
            started: Instant::now(),
            telemetry: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // --- query --------------------------------------------------------------

    /// Answers one question. Turns for the same session are processed in
    /// arrival order; distinct sessions run in parallel.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryRecord, PipelineError> {
        if request.question.trim().is_empty() {
            return Err(PipelineError::Validation("empty question".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(PipelineError::Validation("empty user_id".into()));
        }
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let _turn_guard = self.sessions.acquire(&request.user_id, &session_id).await;

        let mut session = self
            .sessions
            .load_or_create(&request.user_id, &session_id)
            .await?;
        let history: Vec<Message> =
            session.context_messages(self.config.session.context_turns);
        self.sessions
            .append_user_turn(&mut session, &request.question)
            .await?;

        let ctx = self.make_context();
        let query_id = format!("qry_{}", uuid::Uuid::new_v4().simple());
        let initial = crate::state::QueryState {
            question: Some(request.question.clone()),
            user_id: Some(request.user_id.clone()),
            session_id: Some(session_id.clone()),
            history: Some(history),
            query_id: Some(query_id.clone()),
            ..Default::default()
        };

        let (state, _telemetry) = self.compiled.run(&ctx, initial).await?;

        let record = match self.relational.get_query_record(&query_id).await? {
            Some(record) => record,
            // The archive step was bypassed; persist a record now.
            None => {
                let record = crate::node::archive_record(&ctx, &state);
                self.relational.insert_query_record(&record).await?;
                record
            }
        };

        let answer_text = record
            .answer
            .clone()
            .unwrap_or_else(|| self.prompts.escalation_message(Default::default()).to_string());
        self.sessions
            .append_assistant_turn(&mut session, &answer_text, &record.id)
            .await?;
        let low_confidence =
            record.confidence < self.config.pipeline.auto_reply_threshold;
        self.sessions
            .update_dialog(
                &mut session,
                state.dialog_state.unwrap_or_default(),
                low_confidence,
            )
            .await?;

        self.dispatcher
            .emit(
                QUERY_COMPLETED,
                serde_json::json!({
                    "query_id": record.id,
                    "user_id": request.user_id,
                    "session_id": session_id,
                    "action": record.action,
                    "confidence": record.confidence,
                    "cache_hit": record.telemetry.cache_hit,
                }),
            )
            .await?;

        Ok(record)
    }

    // --- search -------------------------------------------------------------

    /// Direct hybrid search over the committed corpus.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchHit>, PipelineError> {
        if request.query.trim().is_empty() {
            return Err(PipelineError::Validation("empty query".into()));
        }
        let top_k = request.top_k.clamp(1, 50);
        let filter = match &request.category {
            Some(category) => VectorFilter::category(category),
            None => VectorFilter::All,
        };

        let vectors = self.embedder.embed(&[request.query.as_str()]).await?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Upstream("embedder returned no vector".into()))?;
        let vector_hits = self.vector.search(&query_vec, top_k, &filter).await?;
        let ids: Vec<String> = vector_hits.iter().map(|h| h.pair_id.clone()).collect();
        let pairs = self.relational.get_pairs(&ids).await?;
        let vector_list: Vec<_> = vector_hits
            .iter()
            .filter_map(|h| {
                pairs
                    .iter()
                    .find(|p| p.id == h.pair_id)
                    .map(|p| (p.clone(), h.score))
            })
            .collect();

        let lexical = self.lexical.snapshot();
        let lexical_list = lexical.search(&request.query, top_k, &filter);

        let mut fused = fuse(&vector_list, &lexical_list, self.config.search.alpha);
        fused.truncate(top_k);
        let candidates: Vec<_> = fused.iter().map(|d| d.pair.clone()).collect();
        let scores = self.reranker.score(&request.query, &candidates).await?;
        let reranked = apply_rerank(fused, &scores);

        Ok(reranked
            .into_iter()
            .map(|scored| SearchHit::from_scored(scored, &request.query))
            .collect())
    }

    // --- ingestion ----------------------------------------------------------

    /// Stages an upload: parse, auto-classify, persist the draft. Returns the
    /// draft for review.
    pub async fn stage(&self, files: &[UploadFile]) -> Result<StagingDraft, PipelineError> {
        let mut chunks = parse_upload(files)?;
        let snapshot = self.registry.snapshot();
        let stats = self.classifier.classify(&snapshot, &mut chunks).await?;

        let source = files
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let draft = self.staging.create(&source, chunks).await?;
        info!(draft_id = %draft.draft_id, chunks = draft.chunks.len(), "upload staged");

        self.dispatcher
            .emit(
                JOB_CLASSIFIED,
                serde_json::json!({
                    "draft_id": draft.draft_id,
                    "stats": stats,
                }),
            )
            .await?;
        Ok(draft)
    }

    pub async fn get_draft(&self, draft_id: &str) -> Result<StagingDraft, PipelineError> {
        self.staging.get(draft_id).await
    }

    pub async fn list_drafts(
        &self,
        status: Option<DraftStatus>,
    ) -> Result<Vec<StagingDraft>, PipelineError> {
        self.staging.list(status).await
    }

    /// Applies review edits; idempotent by chunk id.
    pub async fn patch_draft(
        &self,
        draft_id: &str,
        edits: &[ChunkEdit],
    ) -> Result<StagingDraft, PipelineError> {
        self.staging.patch(draft_id, edits).await
    }

    /// Commits a draft into the authoritative stores.
    pub async fn commit(&self, draft_id: &str) -> Result<CommitOutcome, PipelineError> {
        self.committer.commit(draft_id).await
    }

    pub async fn discard_draft(&self, draft_id: &str) -> Result<(), PipelineError> {
        self.staging.discard(draft_id).await
    }

    /// Deletes a document: its pairs are archived atomically in the
    /// relational store, removed from the vector index, and the registry and
    /// lexical snapshots are rebuilt without them.
    pub async fn archive_document(&self, document_id: &str) -> Result<(), PipelineError> {
        let doc = self
            .relational
            .get_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document {}", document_id)))?;
        self.relational.archive_document(document_id).await?;
        self.vector.delete(&doc.pair_ids).await?;

        let pairs = self.relational.list_active_pairs().await?;
        self.registry.rebuild(&pairs, self.embedder.as_ref()).await?;
        self.lexical.rebuild(&pairs);
        self.dispatcher
            .emit(
                crate::webhook::DOCUMENT_ARCHIVED,
                serde_json::json!({
                    "document_id": document_id,
                    "pair_count": doc.pair_ids.len(),
                }),
            )
            .await?;
        Ok(())
    }

    // --- webhooks -----------------------------------------------------------

    pub async fn subscribe(
        &self,
        url: &str,
        kinds: Vec<String>,
        secret: &str,
        policy: DeliveryPolicy,
    ) -> Result<String, PipelineError> {
        self.dispatcher.subscribe(url, kinds, secret, policy).await
    }

    pub async fn list_deliveries(
        &self,
        subscription_id: &str,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<WebhookDelivery>, PipelineError> {
        self.dispatcher.list_deliveries(subscription_id, status).await
    }

    pub async fn retry_delivery(&self, delivery_id: &str) -> Result<(), PipelineError> {
        self.dispatcher.retry(delivery_id).await
    }

    pub async fn dead_deliveries(&self) -> Result<Vec<WebhookDelivery>, PipelineError> {
        self.dispatcher.dead_deliveries().await
    }

    // --- sessions -----------------------------------------------------------

    /// Empties a session's turn log, retaining its identity.
    pub async fn clear_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), PipelineError> {
        self.sessions.clear(user_id, session_id).await?;
        self.dispatcher
            .emit(
                SESSION_CLEARED,
                serde_json::json!({ "user_id": user_id, "session_id": session_id }),
            )
            .await?;
        Ok(())
    }

    /// Marks a session's conversation CLOSED (e.g. the user or an agent ended
    /// it). The turn log is retained and the next query reopens the dialog.
    pub async fn close_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), PipelineError> {
        self.sessions.close(user_id, session_id).await?;
        self.dispatcher
            .emit(
                SESSION_CLOSED,
                serde_json::json!({ "user_id": user_id, "session_id": session_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn set_memory(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PipelineError> {
        Ok(self.sessions.set_memory(user_id, key, value).await?)
    }

    pub async fn get_memory(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, PipelineError> {
        Ok(self.sessions.get_memory(user_id, key).await?)
    }

    // --- registry inspection ------------------------------------------------

    pub fn categories(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .categories()
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn intents(&self, category: &str) -> Vec<String> {
        self.registry
            .snapshot()
            .intents(category)
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Checks whether an answer for this question sits in the cache; test and
    /// admin surface.
    pub async fn cache_contains(&self, question: &str) -> Result<bool, PipelineError> {
        Ok(self.cache.contains(question).await?)
    }

    /// Fetches a stored query record.
    pub async fn query_record(&self, id: &str) -> Result<Option<QueryRecord>, PipelineError> {
        Ok(self.relational.get_query_record(id).await?)
    }

    /// Loads a session snapshot; test and admin surface.
    pub async fn session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<crate::session::Session>, PipelineError> {
        Ok(self.relational.load_session(user_id, session_id).await?)
    }

    /// The routing threshold, exposed so adapters can label UI affordances
    /// consistently with the pipeline.
    pub fn auto_reply_threshold(&self) -> f32 {
        self.config.pipeline.auto_reply_threshold
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

impl std::fmt::Debug for TetherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherService")
            .field("nodes", &self.compiled.order())
            .finish()
    }
}

/// Whether a record describes an auto-reply. Small helper for adapters.
pub fn is_auto_reply(record: &QueryRecord) -> bool {
    record.action == RouteAction::AutoReply
}
