//! Intent/category classification against the registry snapshot.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::state::{Field, QueryState};

use super::require_question;

const FALLBACK_CATEGORY: &str = "general";
const FALLBACK_INTENT: &str = "general";

/// Embeds the question and classifies it to the nearest registry exemplar.
/// An empty registry (fresh deployment) degrades to the general bucket with
/// zero confidence, which downstream treats as an untrusted category.
pub struct IntentNode;

#[async_trait]
impl PipelineNode for IntentNode {
    fn id(&self) -> &str {
        "intent"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .optional(&[Field::Language])
            .guarantees(&[Field::Category, Field::CategoryConfidence, Field::Intent])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            category: Some(FALLBACK_CATEGORY.into()),
            category_confidence: Some(0.0),
            intent: Some(FALLBACK_INTENT.into()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let vectors = ctx.embedder.embed(&[question]).await?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| NodeError::upstream("embedder returned no vector"))?;

        let patch = match ctx.registry.classify(&embedding) {
            Some(hit) => QueryState {
                category: Some(hit.category),
                category_confidence: Some(hit.score.clamp(0.0, 1.0)),
                intent: Some(hit.intent),
                ..Default::default()
            },
            None => self.recovery_patch(),
        };
        Ok((patch, Next::Continue))
    }
}
