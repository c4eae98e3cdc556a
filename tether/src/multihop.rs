//! Multi-hop resolution: complexity scoring, related-pair expansion, and
//! context merging.
//!
//! The complexity score is model-free: counts of question words, logical
//! connectors, conjunctions, and commas (both supported languages) plus a
//! length term. Two thresholds map the score to 1, 2, or 3 hops. Each hop
//! follows the current top pair's category/intent and `see_also` references;
//! the merger concatenates pair texts in rerank order under a token budget,
//! truncating lowest-relevance hops first and never the primary pair.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::config::MultiHopSettings;
use crate::error::NodeError;
use crate::model::{PairOrigin, QAPair, ScoredPair};
use crate::search::{tokenize, Reranker};
use crate::store::RelationalStore;

static QUESTION_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "how", "what", "when", "where", "why", "who", "which", "cómo", "como", "qué", "que",
        "cuándo", "cuando", "dónde", "donde", "por", "quién", "quien", "cuál", "cual",
    ]
    .into_iter()
    .collect()
});

static CONNECTORS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "if", "then", "because", "therefore", "however", "unless", "while", "si", "entonces",
        "porque", "aunque", "mientras", "sino",
    ]
    .into_iter()
    .collect()
});

static CONJUNCTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["and", "or", "but", "y", "o", "pero", "e", "u"].into_iter().collect());

/// Model-free complexity score of a question.
pub fn complexity_score(question: &str) -> f32 {
    let tokens = tokenize(question);
    let question_words = tokens.iter().filter(|t| QUESTION_WORDS.contains(t.as_str())).count();
    let connectors = tokens.iter().filter(|t| CONNECTORS.contains(t.as_str())).count();
    let conjunctions = tokens.iter().filter(|t| CONJUNCTIONS.contains(t.as_str())).count();
    let commas = question.matches(',').count();
    let length_term = (tokens.len() as f32 / 12.0).min(2.0);

    question_words as f32 + 1.5 * connectors as f32 + conjunctions as f32 + 0.5 * commas as f32
        + length_term
}

/// Maps a complexity score to a hop budget via the two thresholds.
pub fn plan_hops(score: f32, settings: &MultiHopSettings) -> u32 {
    let hops = if score >= settings.high_threshold {
        3
    } else if score >= settings.medium_threshold {
        2
    } else {
        1
    };
    hops.min(settings.max_hops.max(1))
}

/// Expands the working set by following the top pair's metadata. Returns the
/// added pairs and the number of hops actually performed (hop 0 is the normal
/// retrieval and is not counted here). Terminates early when no new pair
/// passes the relevance threshold.
pub async fn expand_hops(
    store: &dyn RelationalStore,
    reranker: &dyn Reranker,
    question: &str,
    working_set: &[ScoredPair],
    planned_hops: u32,
    settings: &MultiHopSettings,
) -> Result<(Vec<ScoredPair>, u32), NodeError> {
    let mut added: Vec<ScoredPair> = Vec::new();
    let mut hops_performed = 0u32;

    let Some(primary) = working_set.first() else {
        return Ok((added, 0));
    };

    let mut seen: HashSet<String> = working_set.iter().map(|d| d.pair.id.clone()).collect();
    let mut frontier = primary.pair.clone();

    for hop in 1..planned_hops {
        let mut candidates: Vec<QAPair> = store
            .pairs_by_category(
                &frontier.metadata.category,
                Some(frontier.metadata.intent.as_str()),
            )
            .await?;
        // Same category, any intent, when the intent-narrowed set is exhausted.
        if candidates.iter().all(|c| seen.contains(&c.id)) {
            candidates = store
                .pairs_by_category(&frontier.metadata.category, None)
                .await?;
        }
        for see_also_id in &frontier.metadata.see_also {
            if let Some(pair) = store.get_pair(see_also_id).await? {
                candidates.push(pair);
            }
        }
        candidates.retain(|c| !seen.contains(&c.id));
        if candidates.is_empty() {
            break;
        }

        let scores = reranker
            .score(question, &candidates)
            .await
            .map_err(|e| NodeError::upstream(e.to_string()))?;
        let mut scored: Vec<ScoredPair> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, s)| *s >= settings.min_hop_relevance)
            .map(|(pair, score)| ScoredPair {
                pair,
                score,
                vector_score: 0.0,
                lexical_score: 0.0,
                fusion_rank: usize::MAX,
                origin: PairOrigin::Hop(hop),
            })
            .collect();
        if scored.is_empty() {
            break;
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let best = scored.remove(0);
        seen.insert(best.pair.id.clone());
        frontier = best.pair.clone();
        added.push(best);
        hops_performed += 1;
    }

    Ok((added, hops_performed))
}

/// Rough token estimate for budget enforcement: whitespace words.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Concatenates pair texts in rerank-score order with origin markers, bounded
/// by the token budget. Hops are dropped lowest-relevance-first when over
/// budget; the primary pair is always present.
pub fn merge_context(docs: &[ScoredPair], budget_tokens: usize) -> String {
    let Some((primary, rest)) = docs.split_first() else {
        return String::new();
    };

    let render = |doc: &ScoredPair| {
        let marker = match doc.origin {
            PairOrigin::Primary => "[primary]".to_string(),
            PairOrigin::Hop(n) => format!("[hop {}]", n),
        };
        format!(
            "{} Q: {}\nA: {}",
            marker, doc.pair.question, doc.pair.answer
        )
    };

    let mut sections = vec![render(primary)];
    let mut used = estimate_tokens(&sections[0]);

    // Candidates in rerank-score order; lowest relevance falls off first when
    // the budget runs out.
    let mut ordered: Vec<&ScoredPair> = rest.iter().collect();
    ordered.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for doc in ordered {
        let section = render(doc);
        let cost = estimate_tokens(&section);
        if used + cost > budget_tokens {
            continue;
        }
        used += cost;
        sections.push(section);
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PairMetadata;

    fn settings() -> MultiHopSettings {
        MultiHopSettings::default()
    }

    fn scored(id: &str, score: f32, origin: PairOrigin) -> ScoredPair {
        ScoredPair {
            pair: QAPair {
                id: id.into(),
                question: format!("question for {}", id),
                answer: "an answer with several words in it".into(),
                metadata: PairMetadata::default(),
            },
            score,
            vector_score: 0.0,
            lexical_score: 0.0,
            fusion_rank: 0,
            origin,
        }
    }

    /// **Scenario**: A simple question scores below the medium threshold and
    /// plans a single hop.
    #[test]
    fn simple_question_one_hop() {
        let score = complexity_score("Reset password.");
        assert!(score < settings().medium_threshold, "score {}", score);
        assert_eq!(plan_hops(score, &settings()), 1);
    }

    /// **Scenario**: Two question words, a logical connector, and two
    /// conjunctions push the score over the medium threshold.
    #[test]
    fn complex_question_multi_hop() {
        let question =
            "What happens to my subscription and my data if I cancel, and how do I get a refund?";
        let score = complexity_score(question);
        assert!(score >= settings().medium_threshold, "score {}", score);
        assert!(plan_hops(score, &settings()) >= 2);
    }

    /// **Scenario**: plan_hops respects the configured maximum.
    #[test]
    fn hops_capped_by_config() {
        let mut s = settings();
        s.max_hops = 2;
        assert_eq!(plan_hops(100.0, &s), 2);
    }

    /// **Scenario**: The merged context always contains the primary pair and
    /// stays within the budget.
    #[test]
    fn merge_respects_budget_and_primary() {
        let docs = vec![
            scored("primary", 0.9, PairOrigin::Primary),
            scored("hop_strong", 0.8, PairOrigin::Hop(1)),
            scored("hop_weak", 0.2, PairOrigin::Hop(2)),
        ];
        let tight = merge_context(&docs, 30);
        assert!(tight.contains("[primary]"));
        assert!(estimate_tokens(&tight) <= 30);
        // The weak hop falls off before the strong one.
        if tight.contains("[hop") {
            assert!(tight.contains("hop_strong") || !tight.contains("hop_weak"));
        }

        let roomy = merge_context(&docs, 1000);
        assert!(roomy.contains("[primary]"));
        assert!(roomy.contains("[hop 1]"));
        assert!(roomy.contains("[hop 2]"));
    }

    /// **Scenario**: The primary pair is present even when it alone exceeds
    /// the budget.
    #[test]
    fn primary_never_truncated() {
        let docs = vec![scored("primary", 0.9, PairOrigin::Primary)];
        let merged = merge_context(&docs, 1);
        assert!(merged.contains("[primary]"));
    }
}
