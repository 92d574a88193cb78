//! Final scoring and ordering of candidates.

use std::cmp::Ordering;

use crate::ReferenceEntry;
use crate::coupling::CandidateAggregate;

/// Lower bound on the coupling normalizer.
pub const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RankWeights {
    /// Sum of the weights of every anchor used in the request.
    pub total_anchor_weight: f64,
    /// Share of the combined score given to co-citation, in `[0, 1]`.
    pub co_citation_weight: f64,
}

/// `weighted_score` normalized by the total anchor weight.
pub fn coupling_score(weighted_score: f64, total_anchor_weight: f64) -> f64 {
    weighted_score / total_anchor_weight.max(SCORE_EPSILON)
}

/// Blend coupling and co-citation; a missing co-citation score counts as 0.
pub fn combined_score(coupling: f64, co_citation: Option<f64>, co_citation_weight: f64) -> f64 {
    let w = co_citation_weight.clamp(0.0, 1.0);
    (1.0 - w) * coupling + w * co_citation.unwrap_or(0.0)
}

/// Score `candidates` and return the best `max_results` as entries.
///
/// Ordering: combined score, shared anchor count, citation count (self
/// citations excluded when known) and year, all descending, then record id
/// ascending. The entry id settles anything left so the order is total.
pub fn rank(
    candidates: &[CandidateAggregate],
    max_results: usize,
    weights: RankWeights,
) -> Vec<ReferenceEntry> {
    let mut scored: Vec<ReferenceEntry> = candidates
        .iter()
        .map(|c| {
            let coupling = coupling_score(c.weighted_score, weights.total_anchor_weight);
            let combined = combined_score(coupling, c.co_citation_score, weights.co_citation_weight);

            let mut entry = c.entry.clone();
            entry.shared_ref_count = Some(c.shared_count);
            entry.shared_ref_titles = c.shared_titles.clone();
            entry.coupling_score = Some(coupling);
            entry.co_citation_count = c.co_citation_count;
            entry.co_citation_score = c.co_citation_score;
            entry.combined_score = Some(combined);
            entry
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored.truncate(max_results);
    scored
}

fn compare_ranked(a: &ReferenceEntry, b: &ReferenceEntry) -> Ordering {
    let score = |e: &ReferenceEntry| e.combined_score.unwrap_or(0.0);

    score(b)
        .total_cmp(&score(a))
        .then_with(|| b.shared_ref_count.cmp(&a.shared_ref_count))
        .then_with(|| b.best_citation_count().cmp(&a.best_citation_count()))
        .then_with(|| b.year.cmp(&a.year))
        .then_with(|| a.recid.cmp(&b.recid))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn candidate(recid: &str, shared: usize, weighted: f64) -> CandidateAggregate {
        CandidateAggregate {
            entry: ReferenceEntry {
                id: format!("inspire:{recid}"),
                recid: Some(recid.to_string()),
                title: format!("Paper {recid}"),
                ..Default::default()
            },
            contributing_anchors: HashSet::new(),
            shared_count: shared,
            weighted_score: weighted,
            shared_titles: vec![],
            co_citation_count: None,
            co_citation_score: None,
        }
    }

    fn weights(total: f64, co: f64) -> RankWeights {
        RankWeights {
            total_anchor_weight: total,
            co_citation_weight: co,
        }
    }

    fn order(entries: &[ReferenceEntry]) -> Vec<&str> {
        entries.iter().filter_map(|e| e.recid.as_deref()).collect()
    }

    #[test]
    fn coupling_normalized_by_total_weight() {
        let ranked = rank(&[candidate("1", 2, 1.0)], 10, weights(2.0, 0.0));
        assert_eq!(ranked[0].coupling_score, Some(0.5));
        assert_eq!(ranked[0].combined_score, Some(0.5));
        assert_eq!(ranked[0].shared_ref_count, Some(2));
    }

    #[test]
    fn zero_total_weight_uses_epsilon() {
        let ranked = rank(&[candidate("1", 0, 0.0)], 10, weights(0.0, 0.0));
        assert_eq!(ranked[0].coupling_score, Some(0.0));
    }

    #[test]
    fn blends_co_citation() {
        let mut c = candidate("1", 1, 1.0);
        c.co_citation_score = Some(0.8);
        c.co_citation_count = Some(12);
        let ranked = rank(&[c], 10, weights(2.0, 0.25));
        let combined = ranked[0].combined_score.unwrap();
        assert!((combined - (0.75 * 0.5 + 0.25 * 0.8)).abs() < 1e-12);
        assert_eq!(ranked[0].co_citation_count, Some(12));
    }

    #[test]
    fn missing_co_citation_counts_as_zero() {
        let ranked = rank(&[candidate("1", 1, 1.0)], 10, weights(1.0, 0.5));
        assert_eq!(ranked[0].combined_score, Some(0.5));
        assert_eq!(ranked[0].co_citation_score, None);
    }

    #[test]
    fn tie_breaks_in_order() {
        // Same combined score for every candidate.
        let mut by_shared = candidate("s", 3, 1.0);
        by_shared.entry.citation_count = Some(1);

        let mut by_citations = candidate("c", 2, 1.0);
        by_citations.entry.citation_count = Some(500);
        by_citations.entry.citation_count_without_self = Some(90);

        let mut raw_citations = candidate("r", 2, 1.0);
        raw_citations.entry.citation_count = Some(100);

        let mut by_year_new = candidate("y2", 2, 1.0);
        by_year_new.entry.citation_count = Some(80);
        by_year_new.entry.year = Some(2021);

        let mut by_year_old = candidate("y1", 2, 1.0);
        by_year_old.entry.citation_count = Some(80);
        by_year_old.entry.year = Some(2001);

        let mut id_b = candidate("b", 2, 1.0);
        id_b.entry.citation_count = Some(80);
        id_b.entry.year = Some(2001);

        let pool = vec![
            id_b,
            by_year_old,
            raw_citations,
            by_citations,
            by_year_new,
            by_shared,
        ];
        let ranked = rank(&pool, 10, weights(2.0, 0.0));
        // "c" has 500 raw citations but only 90 without self, below "r".
        assert_eq!(order(&ranked), vec!["s", "r", "c", "y2", "b", "y1"]);
    }

    #[test]
    fn deterministic_across_input_orders() {
        let pool: Vec<_> = (0..12)
            .map(|i| {
                let mut c = candidate(&format!("{:02}", i), 1 + i % 2, 0.5);
                c.entry.citation_count = Some((i % 3) as u32);
                c
            })
            .collect();
        let forward = rank(&pool, 50, weights(1.0, 0.0));
        let mut reversed_pool = pool.clone();
        reversed_pool.reverse();
        let reversed = rank(&reversed_pool, 50, weights(1.0, 0.0));
        assert_eq!(order(&forward), order(&reversed));
    }

    #[test]
    fn truncates_to_max_results() {
        let pool: Vec<_> = (0..5)
            .map(|i| candidate(&i.to_string(), 1, i as f64))
            .collect();
        let ranked = rank(&pool, 2, weights(10.0, 0.0));
        assert_eq!(order(&ranked), vec!["4", "3"]);
        assert!(rank(&pool, 0, weights(10.0, 0.0)).is_empty());
    }

    #[test]
    fn scores_stay_in_unit_range() {
        let mut c = candidate("1", 3, 1.5);
        c.co_citation_score = Some(1.0);
        let ranked = rank(&[c], 10, weights(1.5, 0.5));
        let combined = ranked[0].combined_score.unwrap();
        assert!((0.0..=1.0 + SCORE_EPSILON).contains(&combined));
    }
}
