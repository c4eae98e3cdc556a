//! OpenAI-compatible chat and embedding clients.
//!
//! Uses the Chat Completions and Embeddings APIs. Requires `OPENAI_API_KEY`
//! (or explicit config, e.g. a custom base URL for a compatible provider).

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::message::Message;

use super::{ChatClient, ChatOptions, Embedder, LlmError};

/// OpenAI Chat Completions client implementing [`ChatClient`].
pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatOpenAI {
    /// Builds a client with default config (API key from `OPENAI_API_KEY`).
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Builds a client with custom config (API key, base URL).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    fn to_request_messages(system: &str, messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage::from(system),
        ));
        for m in messages {
            out.push(match m {
                Message::System(s) => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(s.as_str()),
                ),
                Message::User(s) => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(s.as_str()),
                ),
                Message::Assistant(s) => {
                    ChatCompletionRequestMessage::Assistant((s.as_str()).into())
                }
            });
        }
        out
    }
}

#[async_trait]
impl ChatClient for ChatOpenAI {
    async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::to_request_messages(system, messages));
        if let Some(t) = options.temperature {
            args.temperature(t);
        }
        if let Some(m) = options.max_tokens {
            args.max_completion_tokens(m);
        }
        let request = args
            .build()
            .map_err(|e| LlmError::Provider(format!("request build failed: {}", e)))?;

        debug!(
            model = %self.model,
            message_count = messages.len(),
            temperature = ?options.temperature,
            "chat completion request"
        );

        let chat = self.client.chat();
        let call = chat.create(request);
        let response = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| LlmError::Timeout)?,
            None => call.await,
        }
        .map_err(|e| LlmError::Provider(format!("chat API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("no choices returned".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

/// OpenAI Embeddings client implementing [`Embedder`].
///
/// Default model `text-embedding-3-small` (1536 dimensions).
pub struct OpenAIEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config: OpenAIConfig::new(),
            model,
            dimensions,
        }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs.into_iter().next().unwrap())
        } else {
            EmbeddingInput::StringArray(inputs)
        };
        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };

        let client = Client::with_config(self.config.clone());
        let embeddings = client.embeddings();
        let call = embeddings.create(request);
        let response = tokio::time::timeout(Duration::from_secs(60), call)
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Provider(format!("embeddings API error: {}", e)))?;

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
