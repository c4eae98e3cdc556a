//! Shared harness for the end-to-end tests: an in-memory service with mock
//! model clients and a deterministic reranker.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use tether::config::ServiceConfig;
use tether::llm::{LlmError, MockChat, MockEmbedder};
use tether::model::{PairMetadata, QAPair};
use tether::search::{tokenize, Reranker};
use tether::store::{
    InMemoryKvStore, InMemoryRelationalStore, InMemoryVectorStore, RelationalStore, StoreError,
    VectorRecord, VectorStore,
};
use tether::webhook::MockTransport;
use tether::{Embedder, TetherService};

/// Recall-based reranker: the fraction of query tokens covered by the
/// candidate text. Deterministic and monotone in topical overlap.
pub struct RecallReranker;

#[async_trait]
impl Reranker for RecallReranker {
    async fn score(&self, query: &str, candidates: &[QAPair]) -> Result<Vec<f32>, LlmError> {
        let query_tokens: std::collections::HashSet<String> =
            tokenize(query).into_iter().collect();
        Ok(candidates
            .iter()
            .map(|c| {
                let text_tokens: std::collections::HashSet<String> =
                    tokenize(&c.searchable_text()).into_iter().collect();
                let shared = query_tokens.intersection(&text_tokens).count();
                shared as f32 / query_tokens.len().max(1) as f32
            })
            .collect())
    }
}

pub fn pair(id: &str, question: &str, answer: &str, category: &str, intent: &str) -> QAPair {
    QAPair {
        id: id.into(),
        question: question.into(),
        answer: answer.into(),
        metadata: PairMetadata {
            category: category.into(),
            intent: intent.into(),
            confidence: 0.9,
            ..Default::default()
        },
    }
}

pub fn support_corpus() -> Vec<QAPair> {
    vec![
        pair(
            "qa_password",
            "How to reset my password?",
            "Use the reset link on the sign-in page.",
            "account",
            "password_reset",
        ),
        pair(
            "qa_cancel",
            "What happens if I cancel my subscription?",
            "Your subscription data is kept for thirty days after you cancel.",
            "billing",
            "cancellation",
        ),
        pair(
            "qa_refund",
            "How do I get a refund?",
            "Refunds are issued within fourteen days of the request.",
            "billing",
            "refund_policy",
        ),
        pair(
            "qa_invoice",
            "What invoices do I receive after I cancel my subscription?",
            "A final invoice is issued when the subscription ends.",
            "billing",
            "invoices",
        ),
        pair(
            "qa_shipping",
            "How long does shipping take?",
            "Standard shipping takes three to five business days.",
            "shipping",
            "delivery_time",
        ),
    ]
}

/// A shipping/returns-only corpus for the empty-retrieval scenario. The
/// questions deliberately avoid the off-topic query's tokens.
pub fn shipping_corpus() -> Vec<QAPair> {
    vec![
        pair(
            "qa_shipping",
            "How long does standard shipping take?",
            "Standard shipping takes three to five business days.",
            "shipping",
            "delivery_time",
        ),
        pair(
            "qa_returns",
            "How can items be returned?",
            "Returns are accepted within thirty days with the original receipt.",
            "shipping",
            "returns",
        ),
    ]
}

/// Not every test binary touches every handle.
#[allow(dead_code)]
pub struct Harness {
    pub service: TetherService,
    pub relational: Arc<InMemoryRelationalStore>,
    pub vector: Arc<InMemoryVectorStore>,
    pub kv: Arc<InMemoryKvStore>,
    pub chat: Arc<MockChat>,
    pub transport: Arc<MockTransport>,
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.cache.semantic_threshold = Some(0.9);
    // Keep hop expansion permissive enough for the small test corpus, and the
    // retrieval set small enough that related pairs are left for the hops.
    config.multihop.min_hop_relevance = 0.05;
    config.search.top_k = 2;
    config
}

/// Builds a service over in-memory stores. `corpus` is committed directly
/// into the stores before assembly so the registry and lexical snapshots warm
/// from it.
pub async fn harness_with(
    config: ServiceConfig,
    corpus: Vec<QAPair>,
    chat_reply: &str,
    transport_responses: Vec<u16>,
) -> Harness {
    let embedder = Arc::new(MockEmbedder::new(512));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());
    let kv = Arc::new(InMemoryKvStore::new());
    let chat = Arc::new(MockChat::new(chat_reply));
    let transport = Arc::new(MockTransport::new(transport_responses));

    if !corpus.is_empty() {
        relational.insert_pairs(&corpus).await.unwrap();
        let texts: Vec<String> = corpus.iter().map(|p| p.searchable_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embedder.embed(&refs).await.unwrap();
        let records: Vec<VectorRecord> = corpus
            .iter()
            .zip(vectors)
            .map(|(p, v)| VectorRecord {
                pair_id: p.id.clone(),
                vector: v,
                category: p.metadata.category.clone(),
                intent: p.metadata.intent.clone(),
                language: p.metadata.language,
                model: "mock-embedder".into(),
            })
            .collect();
        vector.upsert(&records).await.unwrap();
    }

    let service = TetherService::new(
        config,
        chat.clone(),
        embedder,
        relational.clone(),
        vector.clone(),
        kv.clone(),
        transport.clone(),
    )
    .await
    .unwrap()
    .with_reranker(Arc::new(RecallReranker));

    Harness {
        service,
        relational,
        vector,
        kv,
        chat,
        transport,
    }
}

/// The standard harness: support corpus, grounded chat reply, 200 transport.
pub async fn harness() -> Harness {
    harness_with(
        test_config(),
        support_corpus(),
        "Use the reset link on the sign-in page.",
        vec![200],
    )
    .await
}

#[allow(dead_code)]
pub struct FailingVectorStore;

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn upsert(&self, _records: &[VectorRecord]) -> Result<(), StoreError> {
        Err(StoreError::Storage("vector store unavailable".into()))
    }

    async fn delete(&self, _pair_ids: &[String]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn search(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _filter: &tether::VectorFilter,
    ) -> Result<Vec<tether::store::VectorHit>, StoreError> {
        Ok(Vec::new())
    }

    async fn count(&self, _filter: &tether::VectorFilter) -> Result<usize, StoreError> {
        Ok(0)
    }
}
