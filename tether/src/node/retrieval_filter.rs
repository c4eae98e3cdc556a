//! Builds the vector/lexical retrieval filter from the classified category.

use async_trait::async_trait;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::state::{Field, QueryState};
use crate::store::VectorFilter;

/// Narrows retrieval to the classified category when the classification is
/// trusted (confidence at or above the configured floor and the category
/// exists in the registry); otherwise retrieval runs unfiltered.
pub struct RetrievalFilterNode;

#[async_trait]
impl PipelineNode for RetrievalFilterNode {
    fn id(&self) -> &str {
        "retrieval_filter"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Category, Field::CategoryConfidence])
            .optional(&[Field::Language])
            .guarantees(&[Field::RetrievalFilter])
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            retrieval_filter: Some(VectorFilter::All),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let category = input
            .category
            .as_deref()
            .ok_or_else(|| NodeError::validation("category missing from projected input"))?;
        let confidence = input.category_confidence.unwrap_or(0.0);

        let trusted = confidence >= ctx.config.search.trusted_category_floor
            && ctx.registry.has_category(category);
        let filter = if trusted {
            VectorFilter::category(category)
        } else {
            VectorFilter::All
        };
        tracing::debug!(category = %category, confidence, trusted, "retrieval filter");

        let patch = QueryState {
            retrieval_filter: Some(filter),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
