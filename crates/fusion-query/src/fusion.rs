//! Scoring strategies that combine per-signal rankings.
//!
//! Both strategies score each object once per rewrite and keep the maximum
//! across rewrites. On equal scores the earlier rewrite wins, so
//! `best_rewrite_index` is deterministic.

use std::collections::{BTreeMap, HashMap, HashSet};

use fusion_core::{HybridConfig, IndexedObject, ObjectKey, SignalBreakdown};

use crate::retriever::{Retrieval, RewriteSignals};

/// One object's combined score, before ordering and hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub key: ObjectKey,
    pub fused_score: f64,
    pub best_rewrite_index: usize,
    pub signal_ranks: SignalBreakdown<u32>,
    pub signal_scores: SignalBreakdown<f32>,
}

/// Pluggable combination of retrieval signals.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score every candidate; `objects` holds the hydrated candidates.
    fn fuse(
        &self,
        retrieval: &Retrieval,
        objects: &HashMap<ObjectKey, IndexedObject>,
    ) -> Vec<FusedCandidate>;
}

/// RRF contribution of one 1-based rank.
pub fn rrf_contribution(k: u32, rank: u32) -> f64 {
    1.0 / (f64::from(k) + f64::from(rank))
}

/// Ranks and raw scores of every object present in a rewrite.
fn breakdowns(
    rewrite: &RewriteSignals,
) -> BTreeMap<&ObjectKey, (SignalBreakdown<u32>, SignalBreakdown<f32>)> {
    let mut out: BTreeMap<&ObjectKey, (SignalBreakdown<u32>, SignalBreakdown<f32>)> =
        BTreeMap::new();

    for list in &rewrite.lists {
        for (position, hit) in list.hits.iter().enumerate() {
            let entry = out.entry(&hit.key).or_default();
            // A signal ranks each object at most once; keep the first.
            if entry.0.get(list.signal).is_none() {
                entry.0.set(list.signal, position as u32 + 1);
                entry.1.set(list.signal, hit.score);
            }
        }
    }

    out
}

/// Keep the best score per object; ties go to the lower rewrite index.
fn keep_best(best: &mut BTreeMap<ObjectKey, FusedCandidate>, candidate: FusedCandidate) {
    match best.get_mut(&candidate.key) {
        Some(current) if candidate.fused_score > current.fused_score => *current = candidate,
        Some(_) => {}
        None => {
            best.insert(candidate.key.clone(), candidate);
        }
    }
}

/// Reciprocal Rank Fusion.
///
/// Per rewrite: `sum over signals of 1 / (k + rank)`, absent signals
/// contributing zero. Final score: maximum over rewrites.
#[derive(Debug, Clone, Copy)]
pub struct RrfStrategy {
    k: u32,
}

impl RrfStrategy {
    pub fn new(k: u32) -> Self {
        Self { k }
    }
}

impl ScoringStrategy for RrfStrategy {
    fn name(&self) -> &'static str {
        "rrf"
    }

    fn fuse(
        &self,
        retrieval: &Retrieval,
        _objects: &HashMap<ObjectKey, IndexedObject>,
    ) -> Vec<FusedCandidate> {
        let mut best = BTreeMap::new();

        for rewrite in &retrieval.rewrites {
            for (key, (ranks, scores)) in breakdowns(rewrite) {
                let fused_score: f64 = [ranks.fuzzy, ranks.lexical, ranks.vector]
                    .into_iter()
                    .flatten()
                    .map(|rank| rrf_contribution(self.k, rank))
                    .sum();

                keep_best(
                    &mut best,
                    FusedCandidate {
                        key: key.clone(),
                        fused_score,
                        best_rewrite_index: rewrite.rewrite_index,
                        signal_ranks: ranks,
                        signal_scores: scores,
                    },
                );
            }
        }

        best.into_values().collect()
    }
}

/// Linear vector + entity-match scoring.
///
/// `score = vector_weight * cosine + entity_weight * entity_match`, where
/// `entity_match` is the fraction of entities found in the object's text.
/// Objects below `min_score` or `min_entity_match` are not admitted.
#[derive(Debug, Clone)]
pub struct WeightedStrategy {
    config: HybridConfig,

    /// Explicit entities; each rewrite's own terms are used when empty.
    entities: Vec<String>,
}

impl WeightedStrategy {
    pub fn new(config: HybridConfig, entities: Vec<String>) -> Self {
        Self { config, entities }
    }

    fn entities_for(&self, rewrite: &RewriteSignals) -> Vec<String> {
        if !self.entities.is_empty() {
            return self.entities.clone();
        }

        let mut seen = HashSet::new();
        terms(&rewrite.text)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }
}

impl ScoringStrategy for WeightedStrategy {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn fuse(
        &self,
        retrieval: &Retrieval,
        objects: &HashMap<ObjectKey, IndexedObject>,
    ) -> Vec<FusedCandidate> {
        let mut best = BTreeMap::new();

        for rewrite in &retrieval.rewrites {
            let entities = self.entities_for(rewrite);

            for (key, (ranks, scores)) in breakdowns(rewrite) {
                let Some(object) = objects.get(key) else {
                    continue;
                };

                let similarity = scores.vector.unwrap_or(0.0).max(0.0);
                let matched = entity_match(&entities, &object.search_text);
                let score = self.config.vector_weight * similarity
                    + self.config.entity_weight * matched;

                if score < self.config.min_score || matched < self.config.min_entity_match {
                    continue;
                }

                keep_best(
                    &mut best,
                    FusedCandidate {
                        key: key.clone(),
                        fused_score: f64::from(score),
                        best_rewrite_index: rewrite.rewrite_index,
                        signal_ranks: ranks,
                        signal_scores: scores,
                    },
                );
            }
        }

        best.into_values().collect()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of entities whose every term occurs in `text`.
pub fn entity_match(entities: &[String], text: &str) -> f32 {
    if entities.is_empty() {
        return 0.0;
    }

    let text_terms: HashSet<String> = terms(text).into_iter().collect();
    let matched = entities
        .iter()
        .filter(|entity| {
            let entity_terms = terms(entity);
            !entity_terms.is_empty() && entity_terms.iter().all(|t| text_terms.contains(t))
        })
        .count();

    matched as f32 / entities.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::RankedList;
    use fusion_core::{Signal, SignalHit};

    fn hits(ids: &[&str]) -> Vec<SignalHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| SignalHit {
                key: ObjectKey::new("doc", *id),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect()
    }

    fn rewrite(index: usize, lists: Vec<(Signal, Vec<&str>)>) -> RewriteSignals {
        RewriteSignals {
            rewrite_index: index,
            text: String::new(),
            lists: lists
                .into_iter()
                .map(|(signal, ids)| RankedList {
                    signal,
                    hits: hits(&ids),
                })
                .collect(),
        }
    }

    fn fuse_rrf(rewrites: Vec<RewriteSignals>) -> HashMap<String, FusedCandidate> {
        let retrieval = Retrieval {
            rewrites,
            degraded: Vec::new(),
        };
        RrfStrategy::new(60)
            .fuse(&retrieval, &HashMap::new())
            .into_iter()
            .map(|c| (c.key.object_id.clone(), c))
            .collect()
    }

    #[test]
    fn test_vector_first_lexical_third() {
        let fused = fuse_rrf(vec![rewrite(
            0,
            vec![
                (Signal::Vector, vec!["x", "a", "b"]),
                (Signal::Lexical, vec!["a", "b", "x"]),
            ],
        )]);

        let x = &fused["x"];
        let expected = 1.0 / 61.0 + 1.0 / 63.0;
        assert!((x.fused_score - expected).abs() < 1e-12);
        assert!((x.fused_score - 0.03226).abs() < 1e-4);
        assert_eq!(x.signal_ranks.vector, Some(1));
        assert_eq!(x.signal_ranks.lexical, Some(3));
        assert_eq!(x.signal_ranks.fuzzy, None);
    }

    #[test]
    fn test_better_rank_never_lowers_score() {
        let mut previous = 0.0;
        for rank in (1..=100).rev() {
            let score = rrf_contribution(60, rank);
            assert!(score > previous);
            previous = score;
        }
    }

    #[test]
    fn test_max_across_rewrites() {
        let fused = fuse_rrf(vec![
            rewrite(0, vec![(Signal::Lexical, vec!["a", "b"])]),
            rewrite(
                1,
                vec![(Signal::Lexical, vec!["b"]), (Signal::Fuzzy, vec!["b", "a"])],
            ),
        ]);

        let b = &fused["b"];
        assert_eq!(b.best_rewrite_index, 1);
        assert!((b.fused_score - 2.0 / 61.0).abs() < 1e-12);

        // Not summed across rewrites.
        let a = &fused["a"];
        assert_eq!(a.best_rewrite_index, 0);
        assert!((a.fused_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_equal_rewrites_prefer_first() {
        let fused = fuse_rrf(vec![
            rewrite(0, vec![(Signal::Fuzzy, vec!["a"])]),
            rewrite(1, vec![(Signal::Lexical, vec!["a"])]),
            rewrite(2, vec![(Signal::Vector, vec!["a"])]),
        ]);

        assert_eq!(fused["a"].best_rewrite_index, 0);
        assert_eq!(fused["a"].signal_ranks.fuzzy, Some(1));
    }

    #[test]
    fn test_one_entry_per_identity() {
        let retrieval = Retrieval {
            rewrites: vec![
                rewrite(0, vec![(Signal::Lexical, vec!["a", "b"]), (Signal::Fuzzy, vec!["a"])]),
                rewrite(1, vec![(Signal::Lexical, vec!["a", "c"])]),
            ],
            degraded: Vec::new(),
        };

        let fused = RrfStrategy::new(60).fuse(&retrieval, &HashMap::new());
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_entity_match() {
        let entities = vec!["port generator".to_string(), "coolant".to_string()];
        assert_eq!(entity_match(&entities, "Coolant leak at the PORT generator"), 1.0);
        assert_eq!(entity_match(&entities, "coolant top-up"), 0.5);
        assert_eq!(entity_match(&entities, "anchor"), 0.0);
        assert_eq!(entity_match(&[], "anything"), 0.0);
    }
}
