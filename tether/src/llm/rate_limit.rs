//! Token-bucket rate limiting for model providers.
//!
//! One bucket per provider+model key, shared by every client for that key.
//! `acquire` suspends until a token is available, so callers never busy-wait.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
// tokio's Instant so paused-clock tests see refills advance with sleep().
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `capacity` burst, `refill_per_sec` sustained rate.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token, sleeping until the bucket refills when empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut b = self.bucket.lock().await;
                let elapsed = b.last_refill.elapsed().as_secs_f64();
                b.tokens = (b.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                b.last_refill = Instant::now();
                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - b.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Shared limiter pool keyed by `provider:model`.
pub struct RateLimiterPool {
    limiters: DashMap<String, Arc<RateLimiter>>,
    capacity: u32,
    refill_per_sec: f64,
}

impl RateLimiterPool {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            limiters: DashMap::new(),
            capacity,
            refill_per_sec,
        }
    }

    pub fn limiter(&self, provider: &str, model: &str) -> Arc<RateLimiter> {
        let key = format!("{}:{}", provider, model);
        self.limiters
            .entry(key)
            .or_insert_with(|| Arc::new(RateLimiter::new(self.capacity, self.refill_per_sec)))
            .clone()
    }
}

/// Chat client wrapper that takes a token before every call. Share one
/// limiter across every client for the same provider+model.
pub struct RateLimitedChat {
    inner: Arc<dyn super::ChatClient>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedChat {
    pub fn new(inner: Arc<dyn super::ChatClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait::async_trait]
impl super::ChatClient for RateLimitedChat {
    async fn chat(
        &self,
        system: &str,
        messages: &[crate::message::Message],
        options: &super::ChatOptions,
    ) -> Result<String, super::LlmError> {
        self.limiter.acquire().await;
        self.inner.chat(system, messages, options).await
    }
}

/// Embedder wrapper that takes a token per batch.
pub struct RateLimitedEmbedder {
    inner: Arc<dyn super::Embedder>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedEmbedder {
    pub fn new(inner: Arc<dyn super::Embedder>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait::async_trait]
impl super::Embedder for RateLimitedEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, super::LlmError> {
        self.limiter.acquire().await;
        self.inner.embed(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
