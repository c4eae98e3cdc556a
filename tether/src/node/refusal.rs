//! Refusal node: composes the user-facing escalation response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::{Language, RouteAction};
use crate::prompts::PromptSet;
use crate::state::{Field, QueryState};

use super::reasons;

/// Terminal response for every non-auto-reply path: guardrail blocks, routing
/// escalations, model refusals, and output-guardrail replacements all land
/// here. The answer is the per-language escalation message.
pub struct RefusalNode {
    prompts: Arc<PromptSet>,
}

impl RefusalNode {
    pub fn new(prompts: Arc<PromptSet>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl PipelineNode for RefusalNode {
    fn id(&self) -> &str {
        "refusal"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .optional(&[
                Field::Language,
                Field::EscalationReason,
                Field::BlockReason,
                Field::Blocked,
                Field::Confidence,
            ])
            .guarantees(&[Field::Answer, Field::Action, Field::Confidence])
            .conditional(&[Field::EscalationReason])
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let language = input.language.unwrap_or(Language::En);
        let reason = input.escalation_reason.clone().unwrap_or_else(|| {
            if input.blocked == Some(true) {
                reasons::GUARDRAIL_BLOCK.to_string()
            } else {
                reasons::LOW_CONFIDENCE.to_string()
            }
        });

        let patch = QueryState {
            answer: Some(self.prompts.escalation_message(language).to_string()),
            action: Some(RouteAction::Escalate),
            confidence: Some(input.confidence.unwrap_or(0.0)),
            escalation_reason: Some(reason),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
