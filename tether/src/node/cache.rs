//! Cache lookup and cache store nodes.

use async_trait::async_trait;

use crate::cache::normalize_query;
use crate::contract::NodeContract;
use crate::error::NodeError;
use crate::graph::{Next, PipelineContext, PipelineNode};
use crate::model::{RouteAction, ScoredPair};
use crate::state::{Field, QueryState};

use super::require_question;

/// Exact + semantic cache lookup. On a hit the pipeline short-circuits to the
/// archive step with the cached answer.
pub struct CacheLookupNode;

#[async_trait]
impl PipelineNode for CacheLookupNode {
    fn id(&self) -> &str {
        "cache_lookup"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .guarantees(&[Field::CacheHit, Field::NormalizedKey])
            .conditional(&[
                Field::CachedEntry,
                Field::Answer,
                Field::Confidence,
                Field::Action,
                Field::Docs,
            ])
    }

    fn jump_targets(&self) -> Vec<&'static str> {
        vec!["archive"]
    }

    fn recovery_patch(&self) -> QueryState {
        // A cache outage degrades to a miss.
        QueryState {
            cache_hit: Some(false),
            ..Default::default()
        }
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;
        let normalized_key = normalize_query(question);

        match ctx.cache.lookup(question).await? {
            Some((entry, semantic)) => {
                tracing::debug!(key = %entry.key, semantic, "cache hit");
                let pairs = ctx.relational.get_pairs(&entry.pair_ids).await?;
                let docs: Vec<ScoredPair> = pairs
                    .into_iter()
                    .map(|p| ScoredPair::primary(p, entry.confidence))
                    .collect();
                let patch = QueryState {
                    cache_hit: Some(true),
                    normalized_key: Some(normalized_key),
                    answer: Some(entry.answer.clone()),
                    confidence: Some(entry.confidence),
                    action: Some(RouteAction::AutoReply),
                    docs: Some(docs),
                    cached_entry: Some(entry),
                    ..Default::default()
                };
                Ok((patch, Next::Node("archive".into())))
            }
            None => {
                let patch = QueryState {
                    cache_hit: Some(false),
                    normalized_key: Some(normalized_key),
                    ..Default::default()
                };
                Ok((patch, Next::Continue))
            }
        }
    }
}

/// Writes the answer back to the cache when policy allows: auto-reply action,
/// no guardrail block, not already a cache hit, and a live (non-cancelled)
/// query.
pub struct CacheStoreNode;

#[async_trait]
impl PipelineNode for CacheStoreNode {
    fn id(&self) -> &str {
        "cache_store"
    }

    fn contract(&self) -> NodeContract {
        NodeContract::new()
            .requires(&[Field::Question])
            .optional(&[
                Field::Answer,
                Field::Confidence,
                Field::Action,
                Field::Docs,
                Field::Blocked,
                Field::CacheHit,
            ])
    }

    async fn execute(
        &self,
        ctx: &PipelineContext,
        input: &QueryState,
    ) -> Result<(QueryState, Next), NodeError> {
        let question = require_question(input)?;

        let eligible = input.action == Some(RouteAction::AutoReply)
            && input.blocked != Some(true)
            && input.cache_hit != Some(true)
            && input.answer.is_some();
        // A cancelled query must not leave cache writes behind.
        if eligible && !ctx.expired() {
            let answer = input.answer.as_deref().unwrap_or_default();
            let confidence = input.confidence.unwrap_or(0.0);
            let pair_ids: Vec<String> = input
                .docs
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|d| d.pair.id.clone())
                .collect();
            let stored = ctx
                .cache
                .store(question, answer, pair_ids, confidence)
                .await?;
            tracing::debug!(stored, confidence, "cache store decision");
        }
        Ok((QueryState::default(), Next::Continue))
    }
}
