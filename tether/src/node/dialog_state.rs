//! Dialog-state node: advances the conversation state machine.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::dialog::{detect_topic_loop, next_state, DialogSignals, DialogState, DialogThresholds};
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::state::{Field, QueryState};

use super::reasons;

/// Computes the next dialog state from retrieval confidence, the session's
/// low-confidence streak, the top pair's handoff flag, and repeated-topic
/// loop detection over recent question embeddings.
pub struct DialogStateNode;

#[async_trait]
impl PipelineNode for DialogStateNode {
    fn id(&self) -> &str {
        "dialog_state"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Confidence])
            .optional(&[Field::Docs, Field::UserId, Field::SessionId, Field::Question])
            .guarantees(&[Field::DialogState])
            .conditional(&[Field::EscalationReason])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            dialog_state: Some(DialogState::Open),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let confidence = input.confidence.unwrap_or(0.0);
        let requires_handoff = input
            .docs
            .as_deref()
            .unwrap_or_default()
            .first()
            .map(|d| d.pair.metadata.requires_handoff)
            .unwrap_or(false);

        let (mut current, mut streak, mut recent_questions) =
            (DialogState::Open, 0u32, Vec::new());
        if let (Some(user_id), Some(session_id)) = (&input.user_id, &input.session_id) {
            if let Some(session) = ctx.relational.load_session(user_id, session_id).await? {
                current = session.dialog_state;
                streak = session.low_confidence_streak;
                recent_questions = session.recent_questions(ctx.config.dialog.loop_window);
            }
        }
        if let Some(question) = &input.question {
            if recent_questions.last() != Some(question) {
                recent_questions.push(question.clone());
            }
        }

        let loop_detected = detect_topic_loop(
            ctx.embedder.as_ref(),
            &recent_questions,
            ctx.config.dialog.loop_threshold,
            ctx.config.dialog.min_loop_messages,
        )
        .await?;

        let signals = DialogSignals {
            confidence,
            low_confidence_streak: streak,
            requires_handoff,
            loop_detected,
        };
        let thresholds = DialogThresholds {
            auto_reply_threshold: ctx.config.pipeline.auto_reply_threshold,
            escalate_after_low_turns: ctx.config.dialog.escalate_after_low_turns,
        };
        let state = next_state(current, signals, thresholds);
        tracing::debug!(?state, confidence, streak, requires_handoff, loop_detected, "dialog state");

        let escalation_reason = match state {
            DialogState::Escalated if requires_handoff => {
                Some(reasons::REQUIRES_HANDOFF.to_string())
            }
            DialogState::Escalated => Some(reasons::DIALOG_ESCALATED.to_string()),
            _ => None,
        };
        let patch = QueryState {
            dialog_state: Some(state),
            escalation_reason,
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
