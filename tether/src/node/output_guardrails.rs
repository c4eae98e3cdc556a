//! Output guardrail node: the last gate before an answer leaves the core.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::guardrails::{OutputGuardrails, OutputVerdict};
use crate::model::RouteAction;
use crate::state::{Field, QueryState};

use super::reasons;

/// Redacts PII and enforces groundedness: answers unsupported by the
/// retrieved context are replaced with an escalation. No unguarded output
/// reaches the external interface.
pub struct OutputGuardrailsNode {
    guardrails: OutputGuardrails,
}

impl OutputGuardrailsNode {
    pub fn new(guardrails: OutputGuardrails) -> Self {
        Self { guardrails }
    }
}

#[async_trait]
impl PipelineNode for OutputGuardrailsNode {
    fn id(&self) -> &str {
        "output_guardrails"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Answer, Field::MergedContext])
            .guarantees(&[Field::Answer])
            .conditional(&[Field::Action, Field::EscalationReason, Field::Confidence])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["archive", "refusal"]
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let answer = input
            .answer
            .as_deref()
            .ok_or_else(|| NodeError::validation("answer missing from projected input"))?;
        let context = input.merged_context.as_deref().unwrap_or_default();

        match self.guardrails.check(answer, context) {
            OutputVerdict::Pass { answer, redactions } => {
                if redactions > 0 {
                    tracing::info!(redactions, "redacted PII from answer");
                }
                let patch = QueryState {
                    answer: Some(answer),
                    ..Default::default()
                };
                Ok((patch, Next::Node("archive".into())))
            }
            OutputVerdict::Ungrounded { score } => {
                tracing::warn!(score, "answer not supported by context, escalating");
                let patch = QueryState {
                    answer: Some(String::new()),
                    action: Some(RouteAction::Escalate),
                    escalation_reason: Some(reasons::UNGROUNDED_ANSWER.into()),
                    confidence: Some(0.0),
                    ..Default::default()
                };
                Ok((patch, Next::Node("refusal".into())))
            }
            OutputVerdict::Disallowed => {
                tracing::warn!("disallowed content in model output, escalating");
                let patch = QueryState {
                    answer: Some(String::new()),
                    action: Some(RouteAction::Escalate),
                    escalation_reason: Some(reasons::DISALLOWED_OUTPUT.into()),
                    confidence: Some(0.0),
                    ..Default::default()
                };
                Ok((patch, Next::Node("refusal".into())))
            }
        }
    }
}
