//! Typed shared state for the query pipeline.
//!
//! One state type flows through every node, state-in, state-out. Each field a
//! node may read or write is declared in [`Field`]; node contracts reference
//! fields by this enum, the engine projects the state down to a node's declared
//! inputs before invocation, and node outputs are merged back through per-field
//! reducers (see `reducers`). All fields are optional: absence means "not yet
//! produced by any node".

use crate::dialog::DialogState;
use crate::message::Message;
use crate::model::{CacheEntry, Language, RouteAction, ScoredPair};
use crate::store::VectorFilter;

/// Every field of the shared state. The union of all node contract fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Question,
    UserId,
    SessionId,
    History,
    QueryId,
    Blocked,
    RiskScore,
    BlockReason,
    NormalizedKey,
    CacheHit,
    CachedEntry,
    Language,
    Category,
    CategoryConfidence,
    Intent,
    RetrievalFilter,
    ExpandedQueries,
    VectorHits,
    LexicalHits,
    Docs,
    Confidence,
    ComplexityScore,
    PlannedHops,
    HopsUsed,
    MergedContext,
    DialogState,
    Action,
    EscalationReason,
    Answer,
}

impl Field {
    /// All fields, in pipeline order. Used by strict-mode validation.
    pub const ALL: [Field; 29] = [
        Field::Question,
        Field::UserId,
        Field::SessionId,
        Field::History,
        Field::QueryId,
        Field::Blocked,
        Field::RiskScore,
        Field::BlockReason,
        Field::NormalizedKey,
        Field::CacheHit,
        Field::CachedEntry,
        Field::Language,
        Field::Category,
        Field::CategoryConfidence,
        Field::Intent,
        Field::RetrievalFilter,
        Field::ExpandedQueries,
        Field::VectorHits,
        Field::LexicalHits,
        Field::Docs,
        Field::Confidence,
        Field::ComplexityScore,
        Field::PlannedHops,
        Field::HopsUsed,
        Field::MergedContext,
        Field::DialogState,
        Field::Action,
        Field::EscalationReason,
        Field::Answer,
    ];
}

/// The shared pipeline state. Also the patch type: a node returns a
/// `QueryState` with only its output fields set.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueryState {
    pub question: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub history: Option<Vec<Message>>,
    pub query_id: Option<String>,

    pub blocked: Option<bool>,
    pub risk_score: Option<f32>,
    pub block_reason: Option<String>,

    pub normalized_key: Option<String>,
    pub cache_hit: Option<bool>,
    pub cached_entry: Option<CacheEntry>,

    pub language: Option<Language>,
    pub category: Option<String>,
    pub category_confidence: Option<f32>,
    pub intent: Option<String>,
    pub retrieval_filter: Option<VectorFilter>,
    pub expanded_queries: Option<Vec<String>>,

    pub vector_hits: Option<Vec<ScoredPair>>,
    pub lexical_hits: Option<Vec<ScoredPair>>,
    pub docs: Option<Vec<ScoredPair>>,
    pub confidence: Option<f32>,

    pub complexity_score: Option<f32>,
    pub planned_hops: Option<u32>,
    pub hops_used: Option<u32>,
    pub merged_context: Option<String>,

    pub dialog_state: Option<DialogState>,
    pub action: Option<RouteAction>,
    pub escalation_reason: Option<String>,
    pub answer: Option<String>,
}

impl QueryState {
    /// Whether a field carries a value.
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Question => self.question.is_some(),
            Field::UserId => self.user_id.is_some(),
            Field::SessionId => self.session_id.is_some(),
            Field::History => self.history.is_some(),
            Field::QueryId => self.query_id.is_some(),
            Field::Blocked => self.blocked.is_some(),
            Field::RiskScore => self.risk_score.is_some(),
            Field::BlockReason => self.block_reason.is_some(),
            Field::NormalizedKey => self.normalized_key.is_some(),
            Field::CacheHit => self.cache_hit.is_some(),
            Field::CachedEntry => self.cached_entry.is_some(),
            Field::Language => self.language.is_some(),
            Field::Category => self.category.is_some(),
            Field::CategoryConfidence => self.category_confidence.is_some(),
            Field::Intent => self.intent.is_some(),
            Field::RetrievalFilter => self.retrieval_filter.is_some(),
            Field::ExpandedQueries => self.expanded_queries.is_some(),
            Field::VectorHits => self.vector_hits.is_some(),
            Field::LexicalHits => self.lexical_hits.is_some(),
            Field::Docs => self.docs.is_some(),
            Field::Confidence => self.confidence.is_some(),
            Field::ComplexityScore => self.complexity_score.is_some(),
            Field::PlannedHops => self.planned_hops.is_some(),
            Field::HopsUsed => self.hops_used.is_some(),
            Field::MergedContext => self.merged_context.is_some(),
            Field::DialogState => self.dialog_state.is_some(),
            Field::Action => self.action.is_some(),
            Field::EscalationReason => self.escalation_reason.is_some(),
            Field::Answer => self.answer.is_some(),
        }
    }

    /// Copies one field's value from `src`, overwriting whatever is here.
    pub fn copy_field(&mut self, src: &QueryState, field: Field) {
        match field {
            Field::Question => self.question = src.question.clone(),
            Field::UserId => self.user_id = src.user_id.clone(),
            Field::SessionId => self.session_id = src.session_id.clone(),
            Field::History => self.history = src.history.clone(),
            Field::QueryId => self.query_id = src.query_id.clone(),
            Field::Blocked => self.blocked = src.blocked,
            Field::RiskScore => self.risk_score = src.risk_score,
            Field::BlockReason => self.block_reason = src.block_reason.clone(),
            Field::NormalizedKey => self.normalized_key = src.normalized_key.clone(),
            Field::CacheHit => self.cache_hit = src.cache_hit,
            Field::CachedEntry => self.cached_entry = src.cached_entry.clone(),
            Field::Language => self.language = src.language,
            Field::Category => self.category = src.category.clone(),
            Field::CategoryConfidence => self.category_confidence = src.category_confidence,
            Field::Intent => self.intent = src.intent.clone(),
            Field::RetrievalFilter => self.retrieval_filter = src.retrieval_filter.clone(),
            Field::ExpandedQueries => self.expanded_queries = src.expanded_queries.clone(),
            Field::VectorHits => self.vector_hits = src.vector_hits.clone(),
            Field::LexicalHits => self.lexical_hits = src.lexical_hits.clone(),
            Field::Docs => self.docs = src.docs.clone(),
            Field::Confidence => self.confidence = src.confidence,
            Field::ComplexityScore => self.complexity_score = src.complexity_score,
            Field::PlannedHops => self.planned_hops = src.planned_hops,
            Field::HopsUsed => self.hops_used = src.hops_used,
            Field::MergedContext => self.merged_context = src.merged_context.clone(),
            Field::DialogState => self.dialog_state = src.dialog_state,
            Field::Action => self.action = src.action,
            Field::EscalationReason => self.escalation_reason = src.escalation_reason.clone(),
            Field::Answer => self.answer = src.answer.clone(),
        }
    }

    /// Fields currently carrying a value.
    pub fn present_fields(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| self.has(*f)).collect()
    }

    /// Projects the state down to the given fields; everything else is absent
    /// in the result. This is the input filter applied before each node runs.
    pub fn project(&self, fields: &[Field]) -> QueryState {
        let mut out = QueryState::default();
        for field in fields {
            out.copy_field(self, *field);
        }
        out
    }
}
