//! Heuristics for review-like records (surveys, overviews, the PDG review).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ReferenceEntry;
use crate::normalize::{normalize_title, normalize_venue};
use crate::search::RawHit;

/// Journals that publish (almost) only reviews, in `normalize_venue` form.
const REVIEW_VENUES: &[&str] = &[
    "revmodphys",
    "physrept",
    "physrep",
    "progpartnuclphys",
    "annrevnuclpartsci",
    "annrevastronastrophys",
    "astronastrophysrev",
    "reptprogphys",
    "livingrevrel",
    "physusp",
    "rivnuovocim",
    "nuovocimriv",
];

/// The Particle Data Group review, cited by nearly every paper in the field.
static GENERIC_REVIEW_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^review of particle (physics|properties)\b").unwrap());

/// Metadata a record exposes to the review heuristics.
pub trait ReviewSignals {
    fn title(&self) -> &str;
    fn document_types(&self) -> Vec<&str>;
    fn venues(&self) -> Vec<&str>;
}

impl ReviewSignals for ReferenceEntry {
    fn title(&self) -> &str {
        &self.title
    }

    fn document_types(&self) -> Vec<&str> {
        self.document_type.iter().map(String::as_str).collect()
    }

    fn venues(&self) -> Vec<&str> {
        self.journal_title.as_deref().into_iter().collect()
    }
}

impl ReviewSignals for RawHit {
    fn title(&self) -> &str {
        self.titles.first().map(|t| t.title.as_str()).unwrap_or("")
    }

    fn document_types(&self) -> Vec<&str> {
        self.document_type.iter().map(String::as_str).collect()
    }

    fn venues(&self) -> Vec<&str> {
        self.publication_info
            .iter()
            .filter_map(|p| p.journal_title.as_deref())
            .collect()
    }
}

/// Whether `title` is the generic "Review of Particle Physics".
pub fn is_generic_review_title(title: &str) -> bool {
    GENERIC_REVIEW_TITLE.is_match(&normalize_title(title))
}

/// Whether `venue` is a known review journal (case- and punctuation-insensitive).
pub fn is_review_venue(venue: &str) -> bool {
    let venue = normalize_venue(venue);
    !venue.is_empty() && REVIEW_VENUES.contains(&venue.as_str())
}

/// Whether a record looks like a review: review document type, review
/// journal, or the generic review title.
pub fn is_review_like(record: &impl ReviewSignals) -> bool {
    record
        .document_types()
        .iter()
        .any(|t| t.trim().eq_ignore_ascii_case("review"))
        || record.venues().iter().any(|v| is_review_venue(v))
        || is_generic_review_title(record.title())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{RawPublicationInfo, RawTitle};

    fn entry(title: &str) -> ReferenceEntry {
        ReferenceEntry {
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn generic_title_variants() {
        assert!(is_generic_review_title("Review of Particle Physics"));
        assert!(is_generic_review_title("REVIEW OF PARTICLE PHYSICS."));
        assert!(is_generic_review_title("Review of particle properties"));
        assert!(!is_generic_review_title("A review of particle physics at LHC"));
        assert!(!is_generic_review_title("Review of Particle Physicists"));
    }

    #[test]
    fn document_type_review() {
        let mut e = entry("Neutrino masses");
        assert!(!is_review_like(&e));
        e.document_type = vec!["article".into(), "Review".into()];
        assert!(is_review_like(&e));
    }

    #[test]
    fn venue_matching_ignores_punctuation() {
        let mut e = entry("Neutrino masses");
        e.journal_title = Some("Phys. Rept.".into());
        assert!(is_review_like(&e));
        e.journal_title = Some("Rev.Mod.Phys.".into());
        assert!(is_review_like(&e));
        e.journal_title = Some("Phys.Rev.D".into());
        assert!(!is_review_like(&e));
    }

    #[test]
    fn generic_title_is_review_like() {
        assert!(is_review_like(&entry("Review of Particle Physics")));
    }

    #[test]
    fn raw_hit_signals() {
        let hit = RawHit {
            titles: vec![RawTitle {
                title: "Lattice QCD".into(),
            }],
            publication_info: vec![RawPublicationInfo {
                journal_title: Some("Prog.Part.Nucl.Phys.".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(is_review_like(&hit));
        assert!(!is_review_like(&RawHit::default()));
    }
}
