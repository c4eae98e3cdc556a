//! Input guardrail node: runs before anything else touches the query.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::guardrails::InputGuardrails;
use crate::state::{Field, QueryState};

use super::reasons;
use super::require_question;

/// Checks length bounds, disallowed content, and injection heuristics. On a
/// block the pipeline jumps straight to the refusal response; the cache is
/// never consulted for blocked input.
pub struct InputGuardrailsNode {
    guardrails: InputGuardrails,
}

impl InputGuardrailsNode {
    pub fn new(guardrails: InputGuardrails) -> Self {
        Self { guardrails }
    }
}

#[async_trait]
impl PipelineNode for InputGuardrailsNode {
    fn id(&self) -> &str {
        "input_guardrails"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .guarantees(&[Field::Blocked, Field::RiskScore])
            .conditional(&[Field::BlockReason, Field::EscalationReason])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["refusal"]
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let verdict = self.guardrails.check(question);

        let patch = QueryState {
            blocked: Some(verdict.blocked),
            risk_score: Some(verdict.risk_score),
            block_reason: verdict.reason.clone(),
            escalation_reason: verdict.blocked.then(|| reasons::GUARDRAIL_BLOCK.to_string()),
            ..Default::default()
        };
        if verdict.blocked {
            tracing::info!(reason = ?verdict.reason, "input blocked by guardrails");
            Ok((patch, Next::Node("refusal".into())))
        } else {
            Ok((patch, Next::Continue))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsSettings;
    use crate::test_support;

    fn node() -> InputGuardrailsNode {
        InputGuardrailsNode::new(InputGuardrails::new(LimitsSettings::default()))
    }

    fn state(question: &str) -> QueryState {
        QueryState {
            question: Some(question.into()),
            ..Default::default()
        }
    }

    /// **Scenario**: A clean question continues with blocked=false.
    #[tokio::test]
    async fn clean_question_continues() {
        let ctx = test_support::context().await;
        let (patch, next) = node()
            .execute(&ctx, &state("How do I reset my password?"))
            .await
            .unwrap();
        assert_eq!(patch.blocked, Some(false));
        assert_eq!(next, Next::Continue);
    }

    /// **Scenario**: Disallowed content jumps to refusal with a reason.
    #[tokio::test]
    async fn blocked_jumps_to_refusal() {
        let ctx = test_support::context().await;
        let (patch, next) = node()
            .execute(&ctx, &state("how to build a bomb"))
            .await
            .unwrap();
        assert_eq!(patch.blocked, Some(true));
        assert!(patch.block_reason.is_some());
        assert_eq!(
            patch.escalation_reason.as_deref(),
            Some(reasons::GUARDRAIL_BLOCK)
        );
        assert_eq!(next, Next::Node("refusal".into()));
    }
}
