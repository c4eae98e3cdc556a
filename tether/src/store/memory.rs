//! In-memory store backends for dev and tests.
//!
//! All data lives in `DashMap`s and is lost on drop. Semantics match the
//! SQLite backends: transactional batch writes check every row before any row
//! is inserted, TTL-expired K/V keys read as absent, and sessions expire on
//! load.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{Document, DocumentStatus, QAPair, QueryRecord};
use crate::session::Session;
use crate::webhook::{DeliveryStatus, WebhookDelivery, WebhookEvent, WebhookSubscription};

use super::kv::KvStore;
use super::relational::RelationalStore;
use super::vector::{cosine_similarity, VectorFilter, VectorHit, VectorRecord, VectorStore};
use super::StoreError;

// --------------------------------------------------------------------------
// Relational
// --------------------------------------------------------------------------

/// In-memory relational store.
#[derive(Default)]
pub struct InMemoryRelationalStore {
    documents: DashMap<String, Document>,
    pairs: DashMap<String, QAPair>,
    archived_pairs: DashMap<String, ()>,
    query_records: DashMap<String, QueryRecord>,
    sessions: DashMap<String, Session>,
    subscriptions: DashMap<String, WebhookSubscription>,
    events: DashMap<String, WebhookEvent>,
    deliveries: DashMap<String, WebhookDelivery>,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(user_id: &str, session_id: &str) -> String {
        format!("{}:{}", user_id, session_id)
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        if self.documents.contains_key(&doc.id) {
            return Err(StoreError::Conflict(format!("document {}", doc.id)));
        }
        self.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn archive_document(&self, id: &str) -> Result<(), StoreError> {
        let mut doc = self
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("document {}", id)))?;
        doc.status = DocumentStatus::Archived;
        doc.updated_at = chrono::Utc::now();
        for pair_id in &doc.pair_ids {
            self.archived_pairs.insert(pair_id.clone(), ());
        }
        Ok(())
    }

    async fn insert_pairs(&self, pairs: &[QAPair]) -> Result<(), StoreError> {
        // Validate everything before touching the map so the batch is atomic.
        let mut seen = HashSet::new();
        for pair in pairs {
            pair.validate()
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            if self.pairs.contains_key(&pair.id) || !seen.insert(&pair.id) {
                return Err(StoreError::Conflict(format!("pair {}", pair.id)));
            }
        }
        for pair in pairs {
            self.pairs.insert(pair.id.clone(), pair.clone());
        }
        Ok(())
    }

    async fn delete_pairs(&self, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.pairs.remove(id);
            self.archived_pairs.remove(id);
        }
        Ok(())
    }

    async fn get_pair(&self, id: &str) -> Result<Option<QAPair>, StoreError> {
        Ok(self.pairs.get(id).map(|p| p.clone()))
    }

    async fn get_pairs(&self, ids: &[String]) -> Result<Vec<QAPair>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.pairs.get(id).map(|p| p.clone()))
            .collect())
    }

    async fn list_active_pairs(&self) -> Result<Vec<QAPair>, StoreError> {
        Ok(self
            .pairs
            .iter()
            .filter(|p| !self.archived_pairs.contains_key(p.key()))
            .map(|p| p.clone())
            .collect())
    }

    async fn pairs_by_category(
        &self,
        category: &str,
        intent: Option<&str>,
    ) -> Result<Vec<QAPair>, StoreError> {
        Ok(self
            .pairs
            .iter()
            .filter(|p| !self.archived_pairs.contains_key(p.key()))
            .filter(|p| p.metadata.category == category)
            .filter(|p| intent.map_or(true, |i| p.metadata.intent == i))
            .map(|p| p.clone())
            .collect())
    }

    async fn insert_query_record(&self, record: &QueryRecord) -> Result<(), StoreError> {
        if self.query_records.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("query record {}", record.id)));
        }
        self.query_records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_query_record(&self, id: &str) -> Result<Option<QueryRecord>, StoreError> {
        Ok(self.query_records.get(id).map(|r| r.clone()))
    }

    async fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let key = Self::session_key(user_id, session_id);
        let expired = match self.sessions.get(&key) {
            Some(s) if s.expires_at > chrono::Utc::now() => return Ok(Some(s.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.sessions.remove(&key);
        }
        Ok(None)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let key = Self::session_key(&session.user_id, &session.session_id);
        self.sessions.insert(key, session.clone());
        Ok(())
    }

    async fn insert_subscription(&self, sub: &WebhookSubscription) -> Result<(), StoreError> {
        if self.subscriptions.contains_key(&sub.id) {
            return Err(StoreError::Conflict(format!("subscription {}", sub.id)));
        }
        self.subscriptions.insert(sub.id.clone(), sub.clone());
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &str,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        Ok(self.subscriptions.get(id).map(|s| s.clone()))
    }

    async fn subscriptions_for_kind(
        &self,
        kind: &str,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let kind = crate::webhook::EventKind::new(kind);
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| s.matches(&kind))
            .map(|s| s.clone())
            .collect())
    }

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let mut sub = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", id)))?;
        sub.active = active;
        Ok(())
    }

    async fn insert_event(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        self.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.events.get(id).map(|e| e.clone()))
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.deliveries.insert(delivery.id.clone(), delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, StoreError> {
        Ok(self.deliveries.get(id).map(|d| d.clone()))
    }

    async fn list_deliveries(
        &self,
        subscription_id: &str,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        Ok(self
            .deliveries
            .iter()
            .filter(|d| d.subscription_id == subscription_id)
            .filter(|d| status.map_or(true, |s| d.status == s))
            .map(|d| d.clone())
            .collect())
    }

    async fn list_dead_deliveries(&self) -> Result<Vec<WebhookDelivery>, StoreError> {
        Ok(self
            .deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Dead)
            .map(|d| d.clone())
            .collect())
    }
}

// --------------------------------------------------------------------------
// Vector
// --------------------------------------------------------------------------

/// In-memory vector store: cosine scan over a `DashMap`.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: DashMap<String, VectorRecord>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        for record in records {
            self.records.insert(record.pair_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, pair_ids: &[String]) -> Result<(), StoreError> {
        for id in pair_ids {
            self.records.remove(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let mut hits: Vec<VectorHit> = self
            .records
            .iter()
            .filter(|r| filter.matches(&r.category, &r.intent, r.language))
            .map(|r| VectorHit {
                pair_id: r.pair_id.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, filter: &VectorFilter) -> Result<usize, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(&r.category, &r.intent, r.language))
            .count())
    }
}

// --------------------------------------------------------------------------
// K/V
// --------------------------------------------------------------------------

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at < Instant::now())
    }
}

/// In-memory K/V store with TTL, counters, and list queues.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: DashMap<String, KvEntry>,
    queues: DashMap<String, Mutex<VecDeque<String>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let expired = match self.data.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.data.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.data.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut created = false;
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| {
            created = true;
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            }
        });
        if !created && entry.is_expired() {
            entry.value = value.to_string();
            entry.expires_at = ttl.map(|d| Instant::now() + d);
            created = true;
        }
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::Storage(format!("non-integer value at {}", key)))?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.is_expired())
            .map(|e| (e.key().clone(), e.value.clone()))
            .collect())
    }

    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .unwrap()
            .push_back(value.to_string());
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .queues
            .get(queue)
            .and_then(|q| q.lock().unwrap().pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PairMetadata;

    fn pair(id: &str, category: &str) -> QAPair {
        QAPair {
            id: id.to_string(),
            question: format!("question {}", id),
            answer: format!("answer {}", id),
            metadata: PairMetadata {
                category: category.to_string(),
                intent: "general".to_string(),
                confidence: 0.9,
                ..Default::default()
            },
        }
    }

    /// **Scenario**: A batch with one invalid pair inserts nothing.
    #[tokio::test]
    async fn insert_pairs_is_atomic() {
        let store = InMemoryRelationalStore::new();
        let mut bad = pair("qa_2", "billing");
        bad.answer = String::new();
        let result = store.insert_pairs(&[pair("qa_1", "billing"), bad]).await;
        assert!(result.is_err());
        assert!(store.get_pair("qa_1").await.unwrap().is_none());
    }

    /// **Scenario**: Duplicate ids conflict, both within a batch and across batches.
    #[tokio::test]
    async fn insert_pairs_conflicts_on_duplicate() {
        let store = InMemoryRelationalStore::new();
        store.insert_pairs(&[pair("qa_1", "billing")]).await.unwrap();
        assert!(matches!(
            store.insert_pairs(&[pair("qa_1", "billing")]).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store
            .insert_pairs(&[pair("qa_3", "x"), pair("qa_3", "x")])
            .await
            .is_err());
    }

    /// **Scenario**: Archiving a document hides its pairs from active listings.
    #[tokio::test]
    async fn archive_document_hides_pairs() {
        let store = InMemoryRelationalStore::new();
        store.insert_pairs(&[pair("qa_1", "billing")]).await.unwrap();
        let doc = Document {
            id: "doc_1".into(),
            title: "Billing FAQ".into(),
            pair_ids: vec!["qa_1".into()],
            status: DocumentStatus::Active,
            version: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        store.insert_document(&doc).await.unwrap();
        assert_eq!(store.list_active_pairs().await.unwrap().len(), 1);

        store.archive_document("doc_1").await.unwrap();
        assert!(store.list_active_pairs().await.unwrap().is_empty());
    }

    /// **Scenario**: Vector search respects the filter and ranks by cosine.
    #[tokio::test]
    async fn vector_search_filters_and_ranks() {
        let store = InMemoryVectorStore::new();
        let rec = |id: &str, v: Vec<f32>, cat: &str| VectorRecord {
            pair_id: id.to_string(),
            vector: v,
            category: cat.to_string(),
            intent: "i".to_string(),
            language: crate::model::Language::En,
            model: "mock".to_string(),
        };
        store
            .upsert(&[
                rec("a", vec![1.0, 0.0], "billing"),
                rec("b", vec![0.9, 0.1], "billing"),
                rec("c", vec![1.0, 0.0], "shipping"),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 10, &VectorFilter::category("billing"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].pair_id, "a");

        assert_eq!(store.count(&VectorFilter::All).await.unwrap(), 3);
    }

    /// **Scenario**: TTL-expired keys read as absent; set_nx only wins once.
    #[tokio::test]
    async fn kv_ttl_and_set_nx() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);

        assert!(kv.set_nx("lock", "1", None).await.unwrap());
        assert!(!kv.set_nx("lock", "2", None).await.unwrap());
    }

    /// **Scenario**: Counters increment atomically from zero.
    #[tokio::test]
    async fn kv_incr() {
        let kv = InMemoryKvStore::new();
        assert_eq!(kv.incr("hits", 1).await.unwrap(), 1);
        assert_eq!(kv.incr("hits", 2).await.unwrap(), 3);
    }

    /// **Scenario**: Queues are FIFO per queue name.
    #[tokio::test]
    async fn kv_queue_fifo() {
        let kv = InMemoryKvStore::new();
        kv.push("q", "a").await.unwrap();
        kv.push("q", "b").await.unwrap();
        assert_eq!(kv.pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(kv.pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(kv.pop("q").await.unwrap(), None);
    }
}
