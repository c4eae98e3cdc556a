//! Model provider clients: chat completion and batch embedding.
//!
//! The pipeline depends on two capabilities, `ChatClient` for generation and
//! classification prompts and `Embedder` for vectors, behind traits so tests run
//! against `MockChat` / `MockEmbedder` and production runs against the
//! OpenAI-compatible implementations. Both are rate-limited through a shared
//! token-bucket pool keyed per provider+model.

mod mock;
mod openai;
mod rate_limit;

pub use mock::{MockChat, MockEmbedder};
pub use openai::{ChatOpenAI, OpenAIEmbedder};
pub use rate_limit::{
    RateLimitedChat, RateLimitedEmbedder, RateLimiter, RateLimiterPool,
};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Model provider error.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited")]
    RateLimited,

    #[error("model call timed out")]
    Timeout,
}

/// Per-request generation options. Each value is clamped by the configured
/// caps before the request is issued (see [`ChatOptions::clamped`]).
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

impl ChatOptions {
    /// Clamps each option to its cap; unset options stay unset (the provider
    /// default applies).
    pub fn clamped(
        &self,
        temperature_cap: f32,
        max_tokens_cap: u32,
        timeout_cap: Duration,
    ) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature.map(|t| t.min(temperature_cap)),
            max_tokens: self.max_tokens.map(|m| m.min(max_tokens_cap)),
            timeout: Some(self.timeout.unwrap_or(timeout_cap).min(timeout_cap)),
        }
    }
}

/// Chat completion client: system prompt + messages in, assistant text out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<String, LlmError>;
}

/// Produces fixed-size float vectors from text, one per input in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    /// Identifier of the embedding model, stored on each vector record.
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Options above the caps are clamped; unset temperature stays unset.
    #[test]
    fn options_clamped_to_caps() {
        let opts = ChatOptions {
            temperature: Some(1.8),
            max_tokens: Some(9000),
            timeout: Some(Duration::from_secs(120)),
        };
        let clamped = opts.clamped(1.0, 1024, Duration::from_secs(30));
        assert_eq!(clamped.temperature, Some(1.0));
        assert_eq!(clamped.max_tokens, Some(1024));
        assert_eq!(clamped.timeout, Some(Duration::from_secs(30)));

        let defaulted = ChatOptions::default().clamped(1.0, 1024, Duration::from_secs(30));
        assert_eq!(defaulted.temperature, None);
        assert_eq!(defaulted.timeout, Some(Duration::from_secs(30)));
    }
}
