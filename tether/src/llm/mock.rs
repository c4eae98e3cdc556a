//! Mock chat and embedding clients for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::Message;

use super::{ChatClient, ChatOptions, Embedder, LlmError};

/// Scripted chat client. Returns queued responses in order, then falls back to
/// the fixed response. Records every request for assertions.
pub struct MockChat {
    fallback: String,
    queued: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<(String, Vec<Message>)>>,
}

impl MockChat {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot response ahead of the fallback.
    pub fn push_response(&self, response: impl Into<String>) {
        self.queued.lock().unwrap().push_back(response.into());
    }

    /// All `(system, messages)` requests seen so far.
    pub fn requests(&self) -> Vec<(String, Vec<Message>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((system.to_string(), messages.to_vec()));
        let queued = self.queued.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Deterministic bag-of-words embedder: each token hashes into one slot, so
/// identical texts embed identically, texts sharing words land near each
/// other, and unrelated texts come out near-orthogonal.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            // FNV-1a over the token bytes.
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for b in token.bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            v[(hash % self.dimension as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "mock-embedder"
    }
}
