//! Routing node: auto-reply vs escalate.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::dialog::DialogState;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::RouteAction;
use crate::state::{Field, QueryState};

use super::reasons;

/// Selects `auto_reply` only when confidence clears the threshold, the dialog
/// state permits it, and sources exist; everything else escalates with a
/// machine-readable reason and jumps to the refusal response.
pub struct RouteNode;

#[async_trait]
impl PipelineNode for RouteNode {
    fn id(&self) -> &str {
        "route"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Confidence, Field::DialogState])
            .optional(&[Field::EscalationReason, Field::Docs])
            .guarantees(&[Field::Action])
            .conditional(&[Field::EscalationReason])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["generate", "refusal"]
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let confidence = input.confidence.unwrap_or(0.0);
        let dialog_state = input.dialog_state.unwrap_or(DialogState::Open);
        let has_sources = input
            .docs
            .as_deref()
            .map(|d| !d.is_empty())
            .unwrap_or(false);

        let state_permits = matches!(dialog_state, DialogState::Open | DialogState::Answered);
        let confident = confidence >= ctx.config.pipeline.auto_reply_threshold;

        if confident && state_permits && has_sources {
            let patch = QueryState {
                action: Some(RouteAction::AutoReply),
                ..Default::default()
            };
            return Ok((patch, Next::Node("generate".into())));
        }

        let reason = input.escalation_reason.clone().unwrap_or_else(|| {
            if !has_sources {
                reasons::NO_RELEVANT_CONTEXT.to_string()
            } else {
                reasons::LOW_CONFIDENCE.to_string()
            }
        });
        tracing::info!(confidence, ?dialog_state, reason = %reason, "routing to escalation");
        let patch = QueryState {
            action: Some(RouteAction::Escalate),
            escalation_reason: Some(reason),
            ..Default::default()
        };
        Ok((patch, Next::Node("refusal".into())))
    }
}
