//! Per-field merge strategies for node output patches.
//!
//! When a node's patch is merged into the shared state, each present field is
//! applied through its declared reducer. The default is `Overwrite`; list
//! fields that accumulate across nodes use `MergeUnique`, and fields that must
//! survive once written (e.g. the normalized cache key) use `KeepFirst`.

use std::collections::HashMap;

use crate::state::{Field, QueryState};

/// How a patch value lands on the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// The patch value replaces the current value.
    Overwrite,
    /// The current value wins once set; the patch fills it only when absent.
    KeepFirst,
    /// List fields: append patch items not already present (dedupe by value,
    /// or by pair id for scored pairs).
    MergeUnique,
}

/// The default reducer table for the query pipeline.
pub fn default_reducers() -> HashMap<Field, Reducer> {
    let mut table = HashMap::new();
    for field in Field::ALL {
        table.insert(field, Reducer::Overwrite);
    }
    table.insert(Field::NormalizedKey, Reducer::KeepFirst);
    table.insert(Field::QueryId, Reducer::KeepFirst);
    table.insert(Field::ExpandedQueries, Reducer::MergeUnique);
    table
}

/// Merges every present field of `patch` into `state` through the table.
/// Fields absent from the table fall back to `Overwrite`.
pub fn apply_patch(
    state: &mut QueryState,
    patch: &QueryState,
    reducers: &HashMap<Field, Reducer>,
) {
    for field in patch.present_fields() {
        let reducer = reducers.get(&field).copied().unwrap_or(Reducer::Overwrite);
        apply_field(state, patch, field, reducer);
    }
}

fn apply_field(state: &mut QueryState, patch: &QueryState, field: Field, reducer: Reducer) {
    match reducer {
        Reducer::Overwrite => state.copy_field(patch, field),
        Reducer::KeepFirst => {
            if !state.has(field) {
                state.copy_field(patch, field);
            }
        }
        Reducer::MergeUnique => merge_unique(state, patch, field),
    }
}

fn merge_unique(state: &mut QueryState, patch: &QueryState, field: Field) {
    match field {
        Field::ExpandedQueries => {
            let incoming = patch.expanded_queries.clone().unwrap_or_default();
            let current = state.expanded_queries.get_or_insert_with(Vec::new);
            for q in incoming {
                if !current.contains(&q) {
                    current.push(q);
                }
            }
        }
        Field::Docs => {
            let incoming = patch.docs.clone().unwrap_or_default();
            let current = state.docs.get_or_insert_with(Vec::new);
            for doc in incoming {
                if !current.iter().any(|d| d.pair.id == doc.pair.id) {
                    current.push(doc);
                }
            }
        }
        // MergeUnique only makes sense for list fields; anything else declared
        // with it degrades to overwrite.
        other => state.copy_field(patch, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PairMetadata, QAPair, ScoredPair};

    fn scored(id: &str, score: f32) -> ScoredPair {
        ScoredPair::primary(
            QAPair {
                id: id.to_string(),
                question: "q".into(),
                answer: "a".into(),
                metadata: PairMetadata::default(),
            },
            score,
        )
    }

    /// **Scenario**: Overwrite replaces; KeepFirst preserves the first value.
    #[test]
    fn overwrite_and_keep_first() {
        let reducers = default_reducers();
        let mut state = QueryState {
            confidence: Some(0.4),
            normalized_key: Some("first key".into()),
            ..Default::default()
        };
        let patch = QueryState {
            confidence: Some(0.9),
            normalized_key: Some("second key".into()),
            ..Default::default()
        };
        apply_patch(&mut state, &patch, &reducers);
        assert_eq!(state.confidence, Some(0.9));
        assert_eq!(state.normalized_key.as_deref(), Some("first key"));
    }

    /// **Scenario**: MergeUnique appends new docs and drops duplicates by pair id.
    #[test]
    fn merge_unique_docs() {
        let mut reducers = default_reducers();
        reducers.insert(Field::Docs, Reducer::MergeUnique);
        let mut state = QueryState {
            docs: Some(vec![scored("qa_1", 0.9)]),
            ..Default::default()
        };
        let patch = QueryState {
            docs: Some(vec![scored("qa_1", 0.5), scored("qa_2", 0.7)]),
            ..Default::default()
        };
        apply_patch(&mut state, &patch, &reducers);
        let docs = state.docs.unwrap();
        assert_eq!(docs.len(), 2);
        // The original qa_1 survives; the duplicate is dropped.
        assert_eq!(docs[0].score, 0.9);
        assert_eq!(docs[1].pair.id, "qa_2");
    }

    /// **Scenario**: Absent patch fields leave the state untouched.
    #[test]
    fn absent_fields_ignored() {
        let reducers = default_reducers();
        let mut state = QueryState {
            answer: Some("kept".into()),
            ..Default::default()
        };
        apply_patch(&mut state, &QueryState::default(), &reducers);
        assert_eq!(state.answer.as_deref(), Some("kept"));
    }
}
