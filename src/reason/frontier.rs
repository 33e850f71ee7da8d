//! Per-hop frontier construction: active entities and their candidate edges.
//!
//! Both steps are capped so one hop costs `O(max_active)` regardless of how
//! many entities carry score or how large their out-degrees are. Truncation is
//! positional (first come, first kept), not by score.

use crate::kb::KnowledgeBase;

/// Entities to expand this hop.
///
/// The arg-max entity always comes first (even when every score is 0),
/// followed by every entity scoring strictly above `threshold` in ascending id
/// order. Duplicates are dropped, then the list is cut to `max_active`.
pub fn select_active(scores: &[f32], max_active: usize, threshold: f32) -> Vec<usize> {
    let Some(top) = argmax(scores) else {
        return Vec::new();
    };

    let mut active = Vec::with_capacity(max_active.min(scores.len()));
    active.push(top);
    for (entity, &score) in scores.iter().enumerate() {
        if active.len() >= max_active {
            break;
        }
        if score > threshold && entity != top {
            active.push(entity);
        }
    }
    active.truncate(max_active);
    active
}

/// Edge-table indices leaving the active entities, concatenated in active-set
/// order and cut to `cap` entries. Dead-end entities contribute nothing.
pub fn gather_candidates(kb: &KnowledgeBase, active: &[usize], cap: usize) -> Vec<usize> {
    let mut edges = Vec::new();
    for &entity in active {
        let remaining = cap.saturating_sub(edges.len());
        if remaining == 0 {
            break;
        }
        edges.extend(kb.range(entity).take(remaining));
    }
    edges
}

/// First index of the maximum score.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::EdgeRecord;

    #[test]
    fn argmax_comes_first_then_threshold_members() {
        let scores = [0.95, 0.1, 0.99, 0.92, 0.0];
        assert_eq!(select_active(&scores, 10, 0.9), vec![2, 0, 3]);
    }

    #[test]
    fn all_zero_scores_still_expand_the_first_entity() {
        assert_eq!(select_active(&[0.0; 4], 10, 0.9), vec![0]);
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(select_active(&[0.5, 0.9, 0.9], 10, 0.9), vec![1]);
    }

    #[test]
    fn active_set_never_exceeds_cap() {
        let scores: Vec<f32> = (0..500).map(|i| 0.91 + (i % 7) as f32 * 0.01).collect();
        for cap in [1, 2, 17, 400] {
            let active = select_active(&scores, cap, 0.9);
            assert!(active.len() <= cap);
            assert_eq!(active.len(), cap);
            let mut dedup = active.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), active.len());
        }
    }

    #[test]
    fn empty_scores_select_nothing() {
        assert!(select_active(&[], 4, 0.9).is_empty());
    }

    fn star_kb() -> KnowledgeBase {
        // entity 0 has 7 outgoing edges, entity 1 has 3, entity 2 none.
        let mut edges = Vec::new();
        for _ in 0..7 {
            edges.push(EdgeRecord::new(0, 3, vec![1]));
        }
        for _ in 0..3 {
            edges.push(EdgeRecord::new(1, 3, vec![2]));
        }
        KnowledgeBase::build(4, 1, edges).unwrap()
    }

    #[test]
    fn candidates_follow_active_order_and_cap() {
        let kb = star_kb();
        assert_eq!(gather_candidates(&kb, &[1, 0], 5), vec![7, 8, 9, 0, 1]);
        assert_eq!(gather_candidates(&kb, &[0, 1], 100).len(), 10);
    }

    #[test]
    fn dead_ends_contribute_no_candidates() {
        let kb = star_kb();
        assert!(gather_candidates(&kb, &[2], 10).is_empty());
        assert_eq!(gather_candidates(&kb, &[2, 1], 10), vec![7, 8, 9]);
    }

    #[test]
    fn candidate_count_never_exceeds_cap() {
        let kb = star_kb();
        for max_active in 1..4 {
            let active = select_active(&[0.95, 0.95, 0.95, 0.0], max_active, 0.9);
            let cap = 2 * max_active;
            assert!(gather_candidates(&kb, &active, cap).len() <= cap);
        }
    }
}
