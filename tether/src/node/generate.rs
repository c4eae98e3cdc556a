//! Generation node: grounded answer from the merged context.

use std::sync::Arc;

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::llm::ChatOptions;
use crate::message::Message;
use crate::model::{Language, RouteAction};
use crate::prompts::{is_refusal, PromptMode, PromptSet};
use crate::state::{Field, QueryState};

use super::reasons;
use super::require_question;

/// Invokes the chat model with the per-language system prompt, the bounded
/// conversation history, and the merged context. The prompt mandates
/// context-only answers; a refusal token from the model turns into an
/// escalation.
pub struct GenerateNode {
    prompts: Arc<PromptSet>,
}

impl GenerateNode {
    pub fn new(prompts: Arc<PromptSet>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl PipelineNode for GenerateNode {
    fn id(&self) -> &str {
        "generate"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question, Field::MergedContext])
            .optional(&[Field::History, Field::Language, Field::Docs])
            .guarantees(&[Field::Answer])
            .conditional(&[Field::Action, Field::EscalationReason, Field::Confidence])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["refusal"]
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let context = input
            .merged_context
            .as_deref()
            .ok_or_else(|| NodeError::validation("merged context missing from projected input"))?;
        let language = input.language.unwrap_or(Language::En);

        let system = self.prompts.system_prompt(language, PromptMode::Answer);
        let generation = &ctx.config.generation;

        let mut messages: Vec<Message> = Vec::new();
        if let Some(history) = &input.history {
            let start = history.len().saturating_sub(generation.max_history_turns);
            messages.extend(history[start..].iter().cloned());
        }
        messages.push(Message::user(
            self.prompts.user_message(language, context, question),
        ));

        let options = ChatOptions::default().clamped(
            generation.temperature_cap,
            generation.max_tokens_cap,
            generation.timeout_cap(),
        );
        let reply = ctx.chat.chat(system, &messages, &options).await?;

        if is_refusal(&reply) {
            tracing::info!("model declined to answer from context");
            let patch = QueryState {
                answer: Some(reply),
                action: Some(RouteAction::Escalate),
                escalation_reason: Some(reasons::MODEL_REFUSAL.into()),
                confidence: Some(0.0),
                ..Default::default()
            };
            return Ok((patch, Next::Node("refusal".into())));
        }

        let patch = QueryState {
            answer: Some(reply),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
