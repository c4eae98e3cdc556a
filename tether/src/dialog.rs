//! Dialog state machine and repeated-topic loop detection.
//!
//! The conversation state advances from retrieval confidence, consecutive
//! low-confidence turns, the top pair's handoff flag, and loop detection over
//! recent question embeddings. Routing reads the resulting state: `auto_reply`
//! only from OPEN or ANSWERED.

use crate::error::NodeError;
use crate::llm::Embedder;
use crate::store::vector::cosine_similarity;

/// Conversation state carried on the session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum DialogState {
    #[default]
    Open,
    Clarifying,
    Answered,
    Escalated,
    /// Entered only through the explicit close operation
    /// ([`SessionManager::close`](crate::session::SessionManager::close));
    /// the signal set carries no end-of-conversation evidence, so
    /// [`next_state`] never produces it. Any new turn leaves it.
    Closed,
}

/// Inputs to one transition.
#[derive(Debug, Clone, Copy)]
pub struct DialogSignals {
    /// Top-1 rerank confidence of the current turn.
    pub confidence: f32,
    /// Consecutive low-confidence turns before this one.
    pub low_confidence_streak: u32,
    /// The top retrieved pair demands a human.
    pub requires_handoff: bool,
    /// The user is circling the same topic (see [`detect_topic_loop`]).
    pub loop_detected: bool,
}

/// Transition thresholds, taken from `DialogSettings`.
#[derive(Debug, Clone, Copy)]
pub struct DialogThresholds {
    pub auto_reply_threshold: f32,
    /// Streak length (including the current turn) that forces escalation.
    pub escalate_after_low_turns: u32,
}

/// Computes the next dialog state from the current turn's signals.
///
/// The signals decide the target state regardless of where the conversation
/// stood, so a CLOSED or ESCALATED session reopens the moment a new turn
/// arrives. CLOSED itself is never a result: closing is an explicit
/// operation, not something the retrieval signals can infer.
pub fn next_state(
    _current: DialogState,
    signals: DialogSignals,
    thresholds: DialogThresholds,
) -> DialogState {
    if signals.requires_handoff || signals.loop_detected {
        return DialogState::Escalated;
    }
    let low = signals.confidence < thresholds.auto_reply_threshold;
    if low && signals.low_confidence_streak + 1 >= thresholds.escalate_after_low_turns {
        return DialogState::Escalated;
    }
    if low {
        return DialogState::Clarifying;
    }
    DialogState::Answered
}

/// Detects a repeated-topic loop: at least `min_loop_messages` of the last
/// questions are pairwise similar to the newest one at `loop_threshold` or
/// above (cosine over question embeddings).
pub async fn detect_topic_loop(
    embedder: &dyn Embedder,
    recent_questions: &[String],
    loop_threshold: f32,
    min_loop_messages: usize,
) -> Result<bool, NodeError> {
    if recent_questions.len() < min_loop_messages || min_loop_messages < 2 {
        return Ok(false);
    }
    let texts: Vec<&str> = recent_questions.iter().map(String::as_str).collect();
    let vectors = embedder.embed(&texts).await?;
    let Some(newest) = vectors.last() else {
        return Ok(false);
    };
    let similar = vectors[..vectors.len() - 1]
        .iter()
        .filter(|v| cosine_similarity(newest, v) >= loop_threshold)
        .count();
    // The newest question counts toward the loop itself.
    Ok(similar + 1 >= min_loop_messages)
}
