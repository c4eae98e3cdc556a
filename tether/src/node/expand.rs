//! Optional query-expansion node: lexical variants via a synonym table.

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::search::tokenize;
use crate::state::{Field, QueryState};

use super::require_question;

/// (term, replacement) substitutions; one variant per applicable entry.
static SYNONYMS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("password", "credentials"),
        ("reset", "recover"),
        ("refund", "money back"),
        ("order", "purchase"),
        ("shipping", "delivery"),
        ("cancel", "terminate"),
        ("contraseña", "clave"),
        ("pedido", "compra"),
        ("envío", "entrega"),
        ("reembolso", "devolución"),
    ]
});

/// Produces query variants by single-term synonym substitution. Disabled by
/// default; enable via `[pipeline.nodes.expand]`.
pub struct ExpandNode;

#[async_trait]
impl PipelineNode for ExpandNode {
    fn id(&self) -> &str {
        "expand"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .guarantees(&[Field::ExpandedQueries])
    }

    fn optional(&self) -> bool {
        true
    }

    fn recovery_patch(&self) -> QueryState {
        QueryState {
            expanded_queries: Some(Vec::new()),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        _ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let tokens = tokenize(question);

        let mut variants = Vec::new();
        for (term, replacement) in SYNONYMS.iter() {
            if tokens.iter().any(|t| t == term) {
                let variant = tokens
                    .iter()
                    .map(|t| if t == term { *replacement } else { t.as_str() })
                    .collect::<Vec<_>>()
                    .join(" ");
                if !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
        }
        variants.truncate(3);

        let patch = QueryState {
            expanded_queries: Some(variants),
            ..Default::default()
        };
        Ok((patch, Next::Continue))
    }
}
