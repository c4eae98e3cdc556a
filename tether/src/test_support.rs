//! Shared fixtures for unit tests: mock-backed pipeline contexts and a small
//! seeded corpus.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::cache::AnswerCache;
use crate::config::{CacheSettings, ServiceConfig};
use crate::graph::PipelineContext;
use crate::llm::{ChatClient, MockChat, MockEmbedder};
use crate::model::{PairMetadata, QAPair};
use crate::registry::IntentRegistry;
use crate::search::{LexicalReranker, LexicalSnapshot};
use crate::store::{
    InMemoryKvStore, InMemoryRelationalStore, InMemoryVectorStore, RelationalStore, VectorRecord,
    VectorStore,
};

pub fn config() -> ServiceConfig {
    ServiceConfig {
        cache: CacheSettings {
            semantic_threshold: Some(0.95),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The fixed test corpus.
pub fn corpus() -> Vec<QAPair> {
    let pair = |id: &str, q: &str, a: &str, cat: &str, intent: &str| QAPair {
        id: id.into(),
        question: q.into(),
        answer: a.into(),
        metadata: PairMetadata {
            category: cat.into(),
            intent: intent.into(),
            confidence: 0.9,
            language: crate::model::Language::En,
            ..Default::default()
        },
    };
    vec![
        pair(
            "qa_password",
            "How do I reset my password?",
            "Use the reset link on the sign-in page.",
            "account",
            "password_reset",
        ),
        pair(
            "qa_email",
            "How do I change my email address?",
            "Go to account settings and update your email address.",
            "account",
            "email_change",
        ),
        pair(
            "qa_refund",
            "What is your refund policy?",
            "Refunds are issued within 14 days of purchase.",
            "billing",
            "refund_policy",
        ),
        pair(
            "qa_shipping",
            "How long does shipping take?",
            "Standard shipping takes 3 to 5 business days.",
            "shipping",
            "delivery_time",
        ),
    ]
}

pub fn corpus_pair(id: &str) -> QAPair {
    corpus()
        .into_iter()
        .find(|p| p.id == id)
        .expect("unknown corpus pair id")
}

async fn build_context(chat: Arc<dyn ChatClient>, pairs: &[QAPair]) -> PipelineContext {
    let embedder = Arc::new(MockEmbedder::new(64));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let vector = Arc::new(InMemoryVectorStore::new());
    let kv = Arc::new(InMemoryKvStore::new());
    let registry = IntentRegistry::new();

    if !pairs.is_empty() {
        relational.insert_pairs(pairs).await.unwrap();
        let texts: Vec<String> = pairs.iter().map(|p| p.searchable_text()).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = crate::llm::Embedder::embed(embedder.as_ref(), &refs)
            .await
            .unwrap();
        let records: Vec<VectorRecord> = pairs
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
        registry.rebuild(pairs, embedder.as_ref()).await.unwrap();
    }

    let cache = Arc::new(
        AnswerCache::new(kv.clone(), embedder.clone(), config().cache).unwrap(),
    );

    PipelineContext {
        config: Arc::new(config()),
        chat,
        embedder,
        relational,
        vector,
        kv,
        cache,
        registry: registry.snapshot(),
        lexical: Arc::new(LexicalSnapshot::build(pairs)),
        reranker: Arc::new(LexicalReranker),
        cancel: CancellationToken::new(),
        deadline: None,
        started: Instant::now(),
        telemetry: Arc::new(Mutex::new(Vec::new())),
    }
}

/// A context over empty stores.
pub async fn context() -> PipelineContext {
    build_context(Arc::new(MockChat::new("mock answer")), &[]).await
}

/// A context seeded with [`corpus`]: pairs inserted, vectors upserted,
/// registry and lexical snapshots built.
pub async fn context_with_corpus() -> PipelineContext {
    build_context(Arc::new(MockChat::new("mock answer")), &corpus()).await
}

/// A corpus-seeded context whose chat client answers with `reply`; the mock is
/// returned for request assertions.
pub async fn context_with_chat(reply: &str) -> (PipelineContext, Arc<MockChat>) {
    let chat = Arc::new(MockChat::new(reply));
    let ctx = build_context(chat.clone(), &corpus()).await;
    (ctx, chat)
}
