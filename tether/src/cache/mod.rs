//! Normalized-query answer cache with exact and semantic lookup.
//!
//! Entries are keyed by the normalized query (see `normalize`) and stored in
//! the K/V backend with the configured TTL. Lookup tries the exact key first,
//! then a semantic pass over the known key embeddings at the required cosine
//! threshold. Hits increment `hit_count` fire-and-forget so the increment
//! never doubles GET latency. Writes are gated on confidence and action;
//! eviction keys on `hit_count` (least-frequently-used first).

mod normalize;

pub use normalize::normalize_query;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::config::CacheSettings;
use crate::error::PipelineError;
use crate::llm::Embedder;
use crate::model::CacheEntry;
use crate::store::vector::cosine_similarity;
use crate::store::{KvStore, StoreError};

fn entry_key(key: &str) -> String {
    format!("cache:{}", key)
}

fn hits_key(key: &str) -> String {
    format!("cache_hits:{}", key)
}

/// The answer cache. Shared across queries; lock-free reads.
pub struct AnswerCache {
    kv: Arc<dyn KvStore>,
    embedder: Arc<dyn Embedder>,
    settings: CacheSettings,
    /// Cosine threshold for the semantic pass. Required configuration.
    semantic_threshold: f32,
    /// Embeddings of the original queries behind each live key.
    key_vectors: DashMap<String, Vec<f32>>,
}

impl AnswerCache {
    /// Fails when `cache.semantic_threshold` is not configured; the threshold
    /// has no default.
    pub fn new(
        kv: Arc<dyn KvStore>,
        embedder: Arc<dyn Embedder>,
        settings: CacheSettings,
    ) -> Result<Self, PipelineError> {
        let semantic_threshold = settings.semantic_threshold.ok_or_else(|| {
            PipelineError::Validation(
                "cache.semantic_threshold is required and has no default".into(),
            )
        })?;
        Ok(Self {
            kv,
            embedder,
            settings,
            semantic_threshold,
            key_vectors: DashMap::new(),
        })
    }

    /// Looks up an entry for `question`. Returns the entry and whether the hit
    /// was semantic (vs exact). The `hit_count` increment is spawned and not
    /// awaited.
    pub async fn lookup(&self, question: &str) -> Result<Option<(CacheEntry, bool)>, StoreError> {
        let key = normalize_query(question);
        if let Some(entry) = self.read_entry(&key).await? {
            self.bump_hits(&key);
            return Ok(Some((entry, false)));
        }

        // Semantic pass over known key embeddings.
        let vectors = self
            .embedder
            .embed(&[question])
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let Some(query_vec) = vectors.into_iter().next() else {
            return Ok(None);
        };
        let mut best: Option<(String, f32)> = None;
        for item in self.key_vectors.iter() {
            let score = cosine_similarity(&query_vec, item.value());
            if score >= self.semantic_threshold
                && best.as_ref().map_or(true, |(_, s)| score > *s)
            {
                best = Some((item.key().clone(), score));
            }
        }
        let Some((semantic_key, score)) = best else {
            return Ok(None);
        };
        match self.read_entry(&semantic_key).await? {
            Some(entry) => {
                debug!(key = %semantic_key, score, "semantic cache hit");
                self.bump_hits(&semantic_key);
                Ok(Some((entry, true)))
            }
            None => {
                // The entry expired underneath its embedding.
                self.key_vectors.remove(&semantic_key);
                Ok(None)
            }
        }
    }

    /// Stores an answer. Entries below `min_confidence` are rejected by
    /// policy; the caller additionally gates on `action == auto_reply` and on
    /// guardrail outcomes.
    pub async fn store(
        &self,
        question: &str,
        answer: &str,
        pair_ids: Vec<String>,
        confidence: f32,
    ) -> Result<bool, StoreError> {
        if confidence < self.settings.min_confidence {
            return Ok(false);
        }
        let key = normalize_query(question);
        if key.is_empty() {
            return Ok(false);
        }

        self.evict_if_full().await?;

        let entry = CacheEntry {
            key: key.clone(),
            query: question.to_string(),
            answer: answer.to_string(),
            pair_ids,
            confidence,
            hit_count: 0,
            created_at: Utc::now(),
        };
        self.kv
            .set(
                &entry_key(&key),
                &serde_json::to_string(&entry)?,
                Some(self.settings.ttl()),
            )
            .await?;

        if let Ok(mut vectors) = self.embedder.embed(&[question]).await {
            if let Some(v) = vectors.pop() {
                self.key_vectors.insert(key, v);
            }
        }
        Ok(true)
    }

    /// Whether any entry exists for the normalized key of `question`.
    pub async fn contains(&self, question: &str) -> Result<bool, StoreError> {
        Ok(self
            .read_entry(&normalize_query(question))
            .await?
            .is_some())
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let Some(raw) = self.kv.get(&entry_key(key)).await? else {
            return Ok(None);
        };
        let mut entry: CacheEntry = serde_json::from_str(&raw)?;
        if let Some(hits) = self.kv.get(&hits_key(key)).await? {
            entry.hit_count = hits.parse().unwrap_or(0);
        }
        Ok(Some(entry))
    }

    fn bump_hits(&self, key: &str) {
        let kv = self.kv.clone();
        let key = hits_key(key);
        tokio::spawn(async move {
            let _ = kv.incr(&key, 1).await;
        });
    }

    /// Evicts the least-frequently-used entry once the in-memory bound is
    /// reached. Frequency is the persisted hit counter.
    async fn evict_if_full(&self) -> Result<(), StoreError> {
        let live = self.kv.scan_prefix("cache:").await?;
        if live.len() < self.settings.max_entries {
            return Ok(());
        }
        let mut coldest: Option<(String, u64)> = None;
        for (full_key, _) in live {
            let key = full_key.trim_start_matches("cache:").to_string();
            let hits: u64 = self
                .kv
                .get(&hits_key(&key))
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if coldest.as_ref().map_or(true, |(_, h)| hits < *h) {
                coldest = Some((key, hits));
            }
        }
        if let Some((key, hits)) = coldest {
            debug!(key = %key, hits, "evicting least-frequently-used cache entry");
            self.kv.delete(&entry_key(&key)).await?;
            self.kv.delete(&hits_key(&key)).await?;
            self.key_vectors.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::store::InMemoryKvStore;

    fn cache(max_entries: usize) -> AnswerCache {
        AnswerCache::new(
            Arc::new(InMemoryKvStore::new()),
            Arc::new(MockEmbedder::new(64)),
            CacheSettings {
                semantic_threshold: Some(0.95),
                max_entries,
                ..Default::default()
            },
        )
        .unwrap()
    }

    /// **Scenario**: The same question under different phrasing hits exactly
    /// via the normalized key.
    #[tokio::test]
    async fn exact_hit_after_normalization() {
        let cache = cache(100);
        cache
            .store("How to reset my password?", "Use the link.", vec!["qa_1".into()], 0.9)
            .await
            .unwrap();

        let (entry, semantic) = cache.lookup("reset password please").await.unwrap().unwrap();
        assert_eq!(entry.answer, "Use the link.");
        assert!(!semantic);
    }

    /// **Scenario**: A near-duplicate question with a different normalized key
    /// lands through the semantic pass.
    #[tokio::test]
    async fn semantic_hit_on_similar_query() {
        let cache = AnswerCache::new(
            Arc::new(InMemoryKvStore::new()),
            Arc::new(MockEmbedder::new(64)),
            CacheSettings {
                semantic_threshold: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();
        cache
            .store("reset password", "Use the link.", vec![], 0.9)
            .await
            .unwrap();

        // "urgently" changes the normalized key, so only the semantic pass
        // can find the stored entry.
        let (entry, semantic) = cache
            .lookup("reset password urgently")
            .await
            .unwrap()
            .expect("semantic hit");
        assert!(semantic);
        assert_eq!(entry.answer, "Use the link.");
    }

    /// **Scenario**: Entries below min_confidence are never stored.
    #[tokio::test]
    async fn low_confidence_not_stored() {
        let cache = cache(100);
        let stored = cache
            .store("reset password", "answer", vec![], 0.3)
            .await
            .unwrap();
        assert!(!stored);
        assert!(!cache.contains("reset password").await.unwrap());
    }

    /// **Scenario**: Past the bound, the least-frequently-used entry is evicted.
    #[tokio::test]
    async fn lfu_eviction() {
        let cache = cache(2);
        cache.store("question one", "a1", vec![], 0.9).await.unwrap();
        cache.store("question two", "a2", vec![], 0.9).await.unwrap();

        // Heat up entry one.
        cache.lookup("question one").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Storing a third entry evicts the cold "question two".
        cache.store("question three", "a3", vec![], 0.9).await.unwrap();
        assert!(cache.contains("question one").await.unwrap());
        assert!(!cache.contains("question two").await.unwrap());
        assert!(cache.contains("question three").await.unwrap());
    }
}
