//! Anchor selection: which seed references to search for coupling.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::query::is_valid_recid;
use crate::review::{is_generic_review_title, is_review_like};
use crate::{Anchor, ReferenceEntry};

/// Weight used when an anchor's citation count is unknown.
pub const DEFAULT_ANCHOR_WEIGHT: f64 = 0.25;

/// Citation-count thresholds driving anchor desirability.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTuning {
    /// Lower bound of the preferred range.
    pub sweet_spot_min: u32,
    /// Upper bound of the preferred range.
    pub sweet_spot_max: u32,
    /// Above this an anchor is too generic to be useful.
    pub too_high: u32,
    /// Preferred citation count within a bucket.
    pub target_citations: u32,
}

impl Default for AnchorTuning {
    fn default() -> Self {
        Self {
            sweet_spot_min: 5,
            sweet_spot_max: 300,
            too_high: 1500,
            target_citations: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorOptions {
    pub exclude_review_articles: bool,
    pub tuning: AnchorTuning,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            exclude_review_articles: true,
            tuning: AnchorTuning::default(),
        }
    }
}

/// Priority bucket for a citation count; lower is better.
///
/// 0: within the sweet spot, 1: above it up to `too_high`, 2: unknown,
/// 3: below the sweet spot, 4: above `too_high`.
pub fn citation_bucket(citations: Option<u32>, tuning: &AnchorTuning) -> u8 {
    match citations {
        None => 2,
        Some(c) if c < tuning.sweet_spot_min => 3,
        Some(c) if c <= tuning.sweet_spot_max => 0,
        Some(c) if c <= tuning.too_high => 1,
        Some(_) => 4,
    }
}

/// Distance from the target citation count in log space.
pub fn target_distance(citations: Option<u32>, tuning: &AnchorTuning) -> f64 {
    match citations {
        Some(c) => {
            ((c as f64 + 1.0).log10() - (tuning.target_citations as f64 + 1.0).log10()).abs()
        }
        None => 0.0,
    }
}

/// Coupling weight of an anchor: `1 / (1 + ln(1 + citations))`.
///
/// Non-increasing in `citations`, always in `(0, 1]`.
pub fn anchor_weight(citations: Option<u32>) -> f64 {
    match citations {
        Some(c) => 1.0 / (1.0 + (1.0 + c as f64).ln()),
        None => DEFAULT_ANCHOR_WEIGHT,
    }
}

struct Candidate<'a> {
    index: usize,
    recid: &'a str,
    entry: &'a ReferenceEntry,
    citations: Option<u32>,
    bucket: u8,
    distance: f64,
}

/// Choose up to `max_anchors` seed references as coupling anchors.
///
/// The generic review title is always dropped; other review-like entries only
/// when `exclude_review_articles` is set. Entries without a usable record id
/// are skipped and duplicates keep their first occurrence. The result is
/// ordered best first.
pub fn select_anchors(
    seed_references: &[ReferenceEntry],
    max_anchors: usize,
    options: &AnchorOptions,
) -> Vec<Anchor> {
    if max_anchors == 0 {
        return Vec::new();
    }

    let tuning = &options.tuning;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut candidates: Vec<Candidate<'_>> = Vec::new();

    for (index, entry) in seed_references.iter().enumerate() {
        if is_generic_review_title(&entry.title) {
            continue;
        }
        if options.exclude_review_articles && is_review_like(entry) {
            continue;
        }
        let Some(recid) = entry
            .recid
            .as_deref()
            .map(str::trim)
            .filter(|r| is_valid_recid(r))
        else {
            continue;
        };
        if !seen.insert(recid) {
            continue;
        }

        let citations = entry.best_citation_count();
        candidates.push(Candidate {
            index,
            recid,
            entry,
            citations,
            bucket: citation_bucket(citations, tuning),
            distance: target_distance(citations, tuning),
        });
    }

    candidates.sort_by(|a, b| {
        a.bucket
            .cmp(&b.bucket)
            .then_with(|| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
            .then_with(|| a.index.cmp(&b.index))
    });

    let anchors: Vec<Anchor> = candidates
        .into_iter()
        .take(max_anchors)
        .map(|c| Anchor {
            recid: c.recid.to_string(),
            title: c.entry.title.clone(),
            weight: anchor_weight(c.citations),
            citations: c.citations,
        })
        .collect();

    tracing::debug!(
        seed_references = seed_references.len(),
        anchors = anchors.len(),
        "anchors selected"
    );
    anchors
}
