//! Deterministic ordering and truncation of fused results.

use std::cmp::Ordering;
use std::collections::HashMap;

use fusion_core::{IndexedObject, ObjectKey, SearchHit};

use crate::fusion::FusedCandidate;

/// Total order over hits.
///
/// `fused_score` desc, then `updated_at` desc with missing values last,
/// then `object_id` asc, then `object_type` asc.
pub fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| match (a.updated_at, b.updated_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.object_id.cmp(&b.object_id))
        .then_with(|| a.object_type.cmp(&b.object_type))
}

/// Attach payloads, sort and truncate.
pub fn assemble(
    candidates: Vec<FusedCandidate>,
    objects: &HashMap<ObjectKey, IndexedObject>,
    limit: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|candidate| {
            let object = objects.get(&candidate.key);

            SearchHit {
                payload: object
                    .map(|o| o.payload.clone())
                    .unwrap_or(serde_json::Value::Null),
                updated_at: object.map(|o| o.updated_at),
                object_type: candidate.key.object_type,
                object_id: candidate.key.object_id,
                fused_score: candidate.fused_score,
                best_rewrite_index: candidate.best_rewrite_index,
                signal_ranks: candidate.signal_ranks,
                signal_scores: candidate.signal_scores,
            }
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(limit);

    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_core::SignalBreakdown;

    fn candidate(id: &str, score: f64) -> FusedCandidate {
        FusedCandidate {
            key: ObjectKey::new("doc", id),
            fused_score: score,
            best_rewrite_index: 0,
            signal_ranks: SignalBreakdown::default(),
            signal_scores: SignalBreakdown::default(),
        }
    }

    fn hit(id: &str, score: f64, updated_at: Option<u64>) -> SearchHit {
        SearchHit {
            object_type: "doc".into(),
            object_id: id.into(),
            payload: serde_json::Value::Null,
            fused_score: score,
            best_rewrite_index: 0,
            signal_ranks: SignalBreakdown::default(),
            signal_scores: SignalBreakdown::default(),
            updated_at,
        }
    }

    #[test]
    fn test_equal_scores_newest_first() {
        let mut hits = vec![
            hit("a", 0.5, Some(100)),
            hit("b", 0.5, Some(200)),
            hit("c", 0.9, Some(1)),
        ];
        hits.sort_by(compare_hits);

        let ids: Vec<_> = hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_equal_scores_and_times_by_id() {
        let mut hits = vec![
            hit("m", 0.5, Some(100)),
            hit("k", 0.5, Some(100)),
            hit("z", 0.5, None),
        ];
        hits.sort_by(compare_hits);

        let ids: Vec<_> = hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(ids, vec!["k", "m", "z"]);
    }

    #[test]
    fn test_object_type_breaks_final_tie() {
        let mut a = hit("1", 0.5, None);
        a.object_type = "work_order".into();
        let b = hit("1", 0.5, None);

        assert_eq!(compare_hits(&b, &a), Ordering::Less);
    }

    #[test]
    fn test_truncates_after_sorting() {
        let candidates = vec![
            candidate("low", 0.1),
            candidate("high", 0.9),
            candidate("mid", 0.5),
        ];

        let hits = assemble(candidates, &HashMap::new(), 2);
        let ids: Vec<_> = hits.iter().map(|h| h.object_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert!(hits[0].updated_at.is_none());
    }
}
