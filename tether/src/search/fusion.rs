//! Reciprocal-rank fusion of the vector and lexical result lists.

use std::collections::HashMap;

use crate::model::{PairOrigin, QAPair, ScoredPair};

/// Standard RRF rank constant.
const RRF_K: f32 = 60.0;

/// Fuses the two ranked lists: each pair scores
/// `alpha / (k + vector_rank) + (1 - alpha) / (k + lexical_rank)`, with a
/// missing list contributing nothing. Duplicates within one list keep their
/// best rank. Ties on the fused score break toward the larger vector score;
/// `fusion_rank` records the final position for later rerank tie-breaks.
pub fn fuse(
    vector: &[(QAPair, f32)],
    lexical: &[(QAPair, f32)],
    alpha: f32,
) -> Vec<ScoredPair> {
    struct Candidate {
        pair: QAPair,
        fused: f32,
        vector_score: f32,
        lexical_score: f32,
    }

    let mut by_id: HashMap<String, Candidate> = HashMap::new();

    for (rank, (pair, score)) in vector.iter().enumerate() {
        let contribution = alpha / (RRF_K + rank as f32 + 1.0);
        by_id
            .entry(pair.id.clone())
            .and_modify(|c| {
                // Duplicate within the vector list: the earlier (better) rank
                // already contributed; keep the max score.
                c.vector_score = c.vector_score.max(*score);
            })
            .or_insert_with(|| Candidate {
                pair: pair.clone(),
                fused: contribution,
                vector_score: *score,
                lexical_score: 0.0,
            });
    }

    for (rank, (pair, score)) in lexical.iter().enumerate() {
        let contribution = (1.0 - alpha) / (RRF_K + rank as f32 + 1.0);
        by_id
            .entry(pair.id.clone())
            .and_modify(|c| {
                if c.lexical_score == 0.0 {
                    c.fused += contribution;
                }
                c.lexical_score = c.lexical_score.max(*score);
            })
            .or_insert_with(|| Candidate {
                pair: pair.clone(),
                fused: contribution,
                vector_score: 0.0,
                lexical_score: *score,
            });
    }

    let mut candidates: Vec<Candidate> = by_id.into_values().collect();
    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    candidates
        .into_iter()
        .enumerate()
        .map(|(rank, c)| ScoredPair {
            pair: c.pair,
            score: c.fused,
            vector_score: c.vector_score,
            lexical_score: c.lexical_score,
            fusion_rank: rank,
            origin: PairOrigin::Primary,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PairMetadata;

    fn pair(id: &str) -> QAPair {
        QAPair {
            id: id.into(),
            question: format!("question {}", id),
            answer: format!("answer {}", id),
            metadata: PairMetadata::default(),
        }
    }

    /// **Scenario**: A pair ranked first in both lists beats pairs in one list.
    #[test]
    fn both_lists_beat_single_list() {
        let vector = vec![(pair("a"), 0.9), (pair("b"), 0.8)];
        let lexical = vec![(pair("a"), 5.0), (pair("c"), 4.0)];
        let fused = fuse(&vector, &lexical, 0.7);
        assert_eq!(fused[0].pair.id, "a");
        assert_eq!(fused[0].fusion_rank, 0);
        assert_eq!(fused.len(), 3);
    }

    /// **Scenario**: The alpha weight shifts the balance between the lists.
    #[test]
    fn alpha_weights_lists() {
        let vector = vec![(pair("v"), 0.9)];
        let lexical = vec![(pair("l"), 9.0)];

        let vector_heavy = fuse(&vector, &lexical, 0.9);
        assert_eq!(vector_heavy[0].pair.id, "v");

        let lexical_heavy = fuse(&vector, &lexical, 0.1);
        assert_eq!(lexical_heavy[0].pair.id, "l");
    }

    /// **Scenario**: Vector and lexical scores are preserved on the fused pair.
    #[test]
    fn component_scores_preserved() {
        let vector = vec![(pair("a"), 0.77)];
        let lexical = vec![(pair("a"), 3.3)];
        let fused = fuse(&vector, &lexical, 0.7);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].vector_score - 0.77).abs() < 1e-6);
        assert!((fused[0].lexical_score - 3.3).abs() < 1e-6);
    }

    /// **Scenario**: Fused-score ties break toward the larger vector score.
    #[test]
    fn ties_break_on_vector_score() {
        // Same ranks in symmetric positions with alpha 0.5 produce equal fused
        // scores; the larger vector score must come first.
        let vector = vec![(pair("x"), 0.9), (pair("y"), 0.2)];
        let lexical = vec![(pair("y"), 1.0), (pair("x"), 1.0)];
        let fused = fuse(&vector, &lexical, 0.5);
        let x = fused.iter().position(|p| p.pair.id == "x").unwrap();
        let y = fused.iter().position(|p| p.pair.id == "y").unwrap();
        assert!(x < y);
    }
}
