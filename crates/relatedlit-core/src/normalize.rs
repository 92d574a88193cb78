//! Conversion of raw search hits into [`ReferenceEntry`] records.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::ReferenceEntry;
use crate::search::{RawHit, RawPublicationInfo};

/// Authors kept per entry; `author_count` records the full total.
pub const MAX_AUTHORS: usize = 10;

pub const INSPIRE_RECORD_URL: &str = "https://inspirehep.net/literature/";

/// Normalize a title for comparisons: NFKD with combining marks dropped,
/// lowercased, non-alphanumeric runs collapsed to single spaces.
pub fn normalize_title(title: &str) -> String {
    static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

    let folded: String = title
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    NON_ALNUM.replace_all(&folded, " ").trim().to_string()
}

/// Normalize a journal abbreviation for venue lookups ("Phys. Rept." -> "physrept").
pub fn normalize_venue(venue: &str) -> String {
    normalize_title(venue).replace(' ', "")
}

/// Convert a raw hit into a normalized entry. Scoring fields are left empty.
pub fn normalize_hit(hit: &RawHit) -> ReferenceEntry {
    let recid = hit.control_number.map(|n| n.to_string());
    let title = hit
        .titles
        .iter()
        .map(|t| t.title.trim())
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .to_string();

    let all_authors: Vec<String> = hit
        .authors
        .iter()
        .filter(|a| {
            !a.inspire_roles
                .iter()
                .any(|r| r.eq_ignore_ascii_case("supervisor"))
        })
        .map(|a| a.full_name.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    let author_total = hit
        .author_count
        .unwrap_or(all_authors.len() as u32)
        .max(all_authors.len() as u32);
    let authors: Vec<String> = all_authors.into_iter().take(MAX_AUTHORS).collect();
    let author_count = ((author_total as usize) > authors.len()).then_some(author_total);

    let (errata, publications): (Vec<&RawPublicationInfo>, Vec<&RawPublicationInfo>) = hit
        .publication_info
        .iter()
        .partition(|p| is_erratum(p));
    let primary = publications.iter().find(|p| p.journal_title.is_some());

    let year = hit
        .publication_info
        .iter()
        .find_map(|p| p.year)
        .or_else(|| hit.earliest_date.as_deref().and_then(year_prefix));

    let doi = first_value(hit.dois.iter().map(|d| d.value.as_str()));
    let arxiv_id = first_value(hit.arxiv_eprints.iter().map(|e| e.value.as_str()));

    let id = match &recid {
        Some(r) => format!("inspire:{r}"),
        None => format!("title:{}", normalize_title(&title)),
    };

    ReferenceEntry {
        id,
        inspire_url: recid.as_ref().map(|r| format!("{INSPIRE_RECORD_URL}{r}")),
        recid,
        title,
        authors,
        author_count,
        year,
        citation_count: hit.citation_count,
        citation_count_without_self: hit.citation_count_without_self_citations,
        document_type: hit.document_type.clone(),
        journal_title: primary.and_then(|p| p.journal_title.clone()),
        publication_info: primary.map(|p| format_publication(p)),
        errata: errata.iter().map(|p| format_publication(p)).collect(),
        doi_url: doi.as_ref().map(|d| format!("https://doi.org/{d}")),
        doi,
        arxiv_url: arxiv_id
            .as_ref()
            .map(|a| format!("https://arxiv.org/abs/{a}")),
        arxiv_id,
        ..Default::default()
    }
}

fn is_erratum(info: &RawPublicationInfo) -> bool {
    info.material
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("erratum"))
}

fn first_value<'a>(mut values: impl Iterator<Item = &'a str>) -> Option<String> {
    values
        .find(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
}

fn year_prefix(date: &str) -> Option<u32> {
    date.get(..4).and_then(|y| y.parse().ok())
}

/// Render publication info as "Journal Volume (Year) Pages".
fn format_publication(info: &RawPublicationInfo) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(journal) = &info.journal_title {
        parts.push(journal.clone());
    }
    if let Some(volume) = &info.journal_volume {
        parts.push(volume.clone());
    }
    if let Some(year) = info.year {
        parts.push(format!("({year})"));
    }
    let pages = match (&info.page_start, &info.page_end, &info.artid) {
        (Some(start), Some(end), _) => Some(format!("{start}-{end}")),
        (Some(start), None, _) => Some(start.clone()),
        (None, _, Some(artid)) => Some(artid.clone()),
        _ => None,
    };
    if let Some(pages) = pages {
        parts.push(pages);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{RawAuthor, RawIdentifier, RawTitle};

    fn author(name: &str) -> RawAuthor {
        RawAuthor {
            full_name: name.into(),
            inspire_roles: vec![],
        }
    }

    #[test]
    fn normalize_title_folds_accents_and_punctuation() {
        assert_eq!(
            normalize_title("  Review of Particle Physics!"),
            "review of particle physics"
        );
        assert_eq!(normalize_title("Détecteur — ÉTUDE"), "detecteur etude");
    }

    #[test]
    fn normalize_venue_strips_everything() {
        assert_eq!(normalize_venue("Phys. Rept."), "physrept");
        assert_eq!(normalize_venue("Rev.Mod.Phys."), "revmodphys");
    }

    #[test]
    fn full_hit() {
        let hit = RawHit {
            control_number: Some(42),
            titles: vec![
                RawTitle { title: "  ".into() },
                RawTitle {
                    title: "A Study".into(),
                },
            ],
            authors: vec![
                author("Doe, J."),
                RawAuthor {
                    full_name: "Boss, B.".into(),
                    inspire_roles: vec!["supervisor".into()],
                },
            ],
            citation_count: Some(12),
            citation_count_without_self_citations: Some(10),
            document_type: vec!["article".into()],
            publication_info: vec![
                RawPublicationInfo {
                    journal_title: Some("Phys.Lett.B".into()),
                    journal_volume: Some("800".into()),
                    year: Some(2020),
                    page_start: Some("135".into()),
                    page_end: Some("140".into()),
                    ..Default::default()
                },
                RawPublicationInfo {
                    journal_title: Some("Phys.Lett.B".into()),
                    journal_volume: Some("805".into()),
                    year: Some(2020),
                    artid: Some("135400".into()),
                    material: Some("erratum".into()),
                    ..Default::default()
                },
            ],
            dois: vec![RawIdentifier {
                value: "10.1016/x".into(),
            }],
            arxiv_eprints: vec![RawIdentifier {
                value: "2001.00001".into(),
            }],
            ..Default::default()
        };

        let entry = normalize_hit(&hit);
        assert_eq!(entry.id, "inspire:42");
        assert_eq!(entry.recid.as_deref(), Some("42"));
        assert_eq!(entry.title, "A Study");
        assert_eq!(entry.authors, vec!["Doe, J."]);
        assert_eq!(entry.author_count, None);
        assert_eq!(entry.year, Some(2020));
        assert_eq!(entry.best_citation_count(), Some(10));
        assert_eq!(entry.journal_title.as_deref(), Some("Phys.Lett.B"));
        assert_eq!(
            entry.publication_info.as_deref(),
            Some("Phys.Lett.B 800 (2020) 135-140")
        );
        assert_eq!(entry.errata, vec!["Phys.Lett.B 805 (2020) 135400"]);
        assert_eq!(entry.doi_url.as_deref(), Some("https://doi.org/10.1016/x"));
        assert_eq!(
            entry.arxiv_url.as_deref(),
            Some("https://arxiv.org/abs/2001.00001")
        );
        assert_eq!(
            entry.inspire_url.as_deref(),
            Some("https://inspirehep.net/literature/42")
        );
        assert!(entry.combined_score.is_none());
    }

    #[test]
    fn authors_truncated_with_total() {
        let hit = RawHit {
            control_number: Some(1),
            authors: (0..25).map(|i| author(&format!("Author {i}"))).collect(),
            author_count: Some(3000),
            ..Default::default()
        };
        let entry = normalize_hit(&hit);
        assert_eq!(entry.authors.len(), MAX_AUTHORS);
        assert_eq!(entry.author_count, Some(3000));
    }

    #[test]
    fn year_falls_back_to_earliest_date() {
        let hit = RawHit {
            control_number: Some(1),
            earliest_date: Some("2017-06".into()),
            ..Default::default()
        };
        assert_eq!(normalize_hit(&hit).year, Some(2017));
    }

    #[test]
    fn missing_recid_gets_title_id() {
        let hit = RawHit {
            titles: vec![RawTitle {
                title: "Some Title".into(),
            }],
            ..Default::default()
        };
        let entry = normalize_hit(&hit);
        assert_eq!(entry.recid, None);
        assert_eq!(entry.id, "title:some title");
        assert_eq!(entry.inspire_url, None);
    }
}
