//! Typed service configuration.
//!
//! Deserialized from TOML (every section optional, falling back to defaults)
//! after `env_config::load_and_apply` has populated the environment. One value
//! has **no** default and must be configured explicitly: the semantic-cache
//! similarity threshold. `validate()` rejects a config without it.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::PipelineError;

/// Failure handling for one node, from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The query terminates with the node's error.
    #[default]
    Fatal,
    /// The node's documented recovery patch is applied and the run continues.
    Recover,
    /// State is left unchanged and the run continues.
    Bypass,
}

/// Per-node overrides in `[pipeline.nodes.<id>]`.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub enabled: bool,
    pub policy: FailurePolicy,
    pub timeout_ms: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: FailurePolicy::Fatal,
            timeout_ms: 10_000,
        }
    }
}

impl NodeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Strict contract mode: undeclared outputs and missing required inputs
    /// are fatal `ContractViolation`s instead of logged skips.
    pub strict_contracts: bool,
    pub auto_reply_threshold: f32,
    /// Answers whose content is supported below this fraction by the
    /// retrieved context are replaced with an escalation.
    pub groundedness_floor: f32,
    pub query_deadline_ms: u64,
    /// Per-node overrides keyed by node id.
    pub nodes: HashMap<String, NodeSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            strict_contracts: true,
            auto_reply_threshold: 0.6,
            groundedness_floor: 0.3,
            query_deadline_ms: 30_000,
            nodes: HashMap::new(),
        }
    }
}

impl PipelineSettings {
    pub fn node(&self, id: &str) -> NodeSettings {
        self.nodes.get(id).cloned().unwrap_or_default()
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.query_deadline_ms)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    /// Entries below this confidence are never written.
    pub min_confidence: f32,
    /// Cosine threshold for the secondary semantic lookup. REQUIRED: there is
    /// no default; `validate()` fails when unset.
    pub semantic_threshold: Option<f32>,
    /// In-memory bound; the lowest-hit-count entry is evicted past this.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            min_confidence: 0.6,
            semantic_threshold: None,
            max_entries: 10_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Reciprocal-rank fusion weight: alpha for vector, 1 - alpha for lexical.
    pub alpha: f32,
    pub top_k: usize,
    /// Fused candidates passed to the cross-encoder.
    pub rerank_top_n: usize,
    /// Category filters below this classification confidence are bypassed.
    pub trusted_category_floor: f32,
    /// Vector hits below this cosine similarity are dropped; keeps wholly
    /// off-topic queries from manufacturing a candidate set.
    pub min_vector_score: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            top_k: 20,
            rerank_top_n: 10,
            trusted_category_floor: 0.5,
            min_vector_score: 0.25,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct MultiHopSettings {
    /// Complexity score thresholds mapping to 1/2/3 hops.
    pub medium_threshold: f32,
    pub high_threshold: f32,
    pub max_hops: u32,
    /// Minimum relevance for a hop pair to join the working set.
    pub min_hop_relevance: f32,
    /// Budget for the merged context, in estimated tokens.
    pub context_token_budget: usize,
}

impl Default for MultiHopSettings {
    fn default() -> Self {
        Self {
            medium_threshold: 2.0,
            high_threshold: 4.0,
            max_hops: 3,
            min_hop_relevance: 0.3,
            context_token_budget: 1600,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct DialogSettings {
    /// Cosine threshold for repeated-topic loop detection.
    pub loop_threshold: f32,
    /// Minimum similar questions (including the newest) for a loop.
    pub min_loop_messages: usize,
    /// Window of recent user turns inspected for loops.
    pub loop_window: usize,
    /// Consecutive low-confidence turns that force escalation.
    pub escalate_after_low_turns: u32,
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self {
            loop_threshold: 0.9,
            min_loop_messages: 3,
            loop_window: 6,
            escalate_after_low_turns: 3,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    /// Conversation history turns passed to the model.
    pub max_history_turns: usize,
    pub temperature_cap: f32,
    pub max_tokens_cap: u32,
    pub timeout_cap_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_history_turns: 6,
            temperature_cap: 1.0,
            max_tokens_cap: 1024,
            timeout_cap_ms: 20_000,
        }
    }
}

impl GenerationSettings {
    pub fn timeout_cap(&self) -> Duration {
        Duration::from_millis(self.timeout_cap_ms)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub ttl_hours: u64,
    pub context_turns: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            context_turns: 6,
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Top-level k-means cluster count.
    pub n_categories: usize,
    /// Intent clusters within each category cluster.
    pub m_intents_per_category: usize,
    pub draft_ttl_secs: u64,
    /// Handoff keyword-score band: below `low` is no-handoff, above `high`
    /// is handoff, in between the model decides.
    pub handoff_low: f32,
    pub handoff_high: f32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            n_categories: 15,
            m_intents_per_category: 3,
            draft_ttl_secs: 6 * 3600,
            handoff_low: 0.2,
            handoff_high: 0.6,
        }
    }
}

impl IngestSettings {
    pub fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    /// Backoff waits between attempts, in seconds.
    pub schedule_secs: Vec<u64>,
    pub jitter: f32,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
    pub skew_secs: u64,
    pub tenant: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            schedule_secs: vec![5, 30, 300, 1800],
            jitter: 0.2,
            max_concurrency: 8,
            timeout_secs: 10,
            skew_secs: 300,
            tenant: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LimitsSettings {
    /// Input guardrail length bounds on the question, in characters.
    pub min_question_chars: usize,
    pub max_question_chars: usize,
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            min_question_chars: 2,
            max_question_chars: 2000,
        }
    }
}

/// The full service configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub pipeline: PipelineSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub multihop: MultiHopSettings,
    pub dialog: DialogSettings,
    pub generation: GenerationSettings,
    pub session: SessionSettings,
    pub ingest: IngestSettings,
    pub webhook: WebhookSettings,
    pub limits: LimitsSettings,
}

/// Loads `.env` and `~/.config/tether/config.toml` `[env]` into the process
/// environment (existing env always wins). Call once at startup, before
/// constructing provider clients that read env vars.
pub fn load_environment() -> Result<(), PipelineError> {
    env_config::load_and_apply("tether", None)
        .map_err(|e| PipelineError::Validation(format!("environment load: {}", e)))
}

impl ServiceConfig {
    /// Parses TOML and validates. Use `ServiceConfig::default()` plus an
    /// explicit `cache.semantic_threshold` in tests.
    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| PipelineError::Validation(format!("config parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that are structurally valid but unusable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self.cache.semantic_threshold {
            None => {
                return Err(PipelineError::Validation(
                    "cache.semantic_threshold is required and has no default".into(),
                ))
            }
            Some(t) if !(0.0..=1.0).contains(&t) => {
                return Err(PipelineError::Validation(format!(
                    "cache.semantic_threshold {} outside [0, 1]",
                    t
                )))
            }
            Some(_) => {}
        }
        if !(0.0..=1.0).contains(&self.search.alpha) {
            return Err(PipelineError::Validation(format!(
                "search.alpha {} outside [0, 1]",
                self.search.alpha
            )));
        }
        if self.webhook.schedule_secs.is_empty() {
            return Err(PipelineError::Validation(
                "webhook.schedule_secs must list at least one wait".into(),
            ));
        }
        if self.multihop.medium_threshold >= self.multihop.high_threshold {
            return Err(PipelineError::Validation(
                "multihop.medium_threshold must be below high_threshold".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServiceConfig {
        ServiceConfig {
            cache: CacheSettings {
                semantic_threshold: Some(0.85),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// **Scenario**: The semantic threshold is required; a config without it fails.
    #[test]
    fn semantic_threshold_required() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    /// **Scenario**: Out-of-range thresholds and empty schedules are rejected.
    #[test]
    fn bad_values_rejected() {
        let mut config = valid();
        config.cache.semantic_threshold = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.webhook.schedule_secs.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.multihop.medium_threshold = 5.0;
        assert!(config.validate().is_err());
    }

    /// **Scenario**: TOML sections parse and per-node overrides land.
    #[test]
    fn from_toml_parses_sections() {
        let config = ServiceConfig::from_toml(
            r#"
            [cache]
            semantic_threshold = 0.85

            [search]
            alpha = 0.6

            [pipeline.nodes.rerank]
            policy = "bypass"
            timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.semantic_threshold, Some(0.85));
        assert!((config.search.alpha - 0.6).abs() < 1e-6);
        let rerank = config.pipeline.node("rerank");
        assert_eq!(rerank.policy, FailurePolicy::Bypass);
        assert_eq!(rerank.timeout_ms, 500);
        // Untouched sections keep their defaults.
        assert_eq!(config.session.ttl_hours, 24);
    }

    /// **Scenario**: Per-node settings fall back to the defaults when absent.
    #[test]
    fn node_settings_default() {
        let config = valid();
        let s = config.pipeline.node("rerank");
        assert!(s.enabled);
        assert_eq!(s.policy, FailurePolicy::Fatal);
    }
}
