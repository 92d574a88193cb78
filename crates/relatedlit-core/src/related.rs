//! Request orchestration: anchors, coupling, co-citation, ranking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::anchors::select_anchors;
use crate::cocitation::refine_with_co_citation;
use crate::coupling::{CandidateAggregate, CouplingParams, aggregate_coupling};
use crate::normalize::normalize_hit;
use crate::query::{self, is_valid_recid};
use crate::rank::{RankWeights, rank};
use crate::search::{LiteratureSearch, SearchRequest, search_or_cancel};
use crate::{CoreError, ProgressEvent, ProgressSender, ReferenceEntry, RelatedOptions};

/// Page size when listing a seed's references.
pub const REFERENCE_PAGE_SIZE: usize = 250;
/// Upper bound on reference pages fetched for one seed.
pub const MAX_REFERENCE_PAGES: usize = 4;

pub(crate) async fn fetch_related(
    search: Arc<dyn LiteratureSearch>,
    seed_recid: &str,
    seed_references: &[ReferenceEntry],
    options: &RelatedOptions,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
) -> Result<Vec<ReferenceEntry>, CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    let seed_recid = seed_recid.trim();
    if !is_valid_recid(seed_recid) {
        tracing::warn!(seed = seed_recid, "unusable seed record id, nothing to relate");
        return Ok(Vec::new());
    }
    let start = Instant::now();

    let anchors = select_anchors(
        seed_references,
        options.max_anchors,
        &options.anchor_options(),
    );
    if let Some(sender) = &progress {
        sender.emit(ProgressEvent::AnchorsSelected {
            count: anchors.len(),
        });
    }
    if anchors.is_empty() {
        tracing::info!(seed = seed_recid, "no usable anchors");
        return Ok(Vec::new());
    }
    let total_anchor_weight: f64 = anchors.iter().map(|a| a.weight).sum();

    let mut excluded: HashSet<String> = seed_references
        .iter()
        .filter_map(|r| r.recid.as_deref())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if let Some(host) = &options.host {
        excluded.extend(host.seed_reference_ids());
    }

    let params = CouplingParams {
        seed_recid: seed_recid.to_string(),
        excluded_recids: excluded,
        per_anchor: options.per_anchor,
        concurrency: options.concurrency,
        exclude_review_articles: options.exclude_review_articles,
        snapshot_size: options.max_results,
        progress_interval: options.progress_interval,
    };
    let map = aggregate_coupling(
        Arc::clone(&search),
        Arc::new(anchors),
        Arc::new(params),
        progress.clone(),
        cancel.clone(),
    )
    .await?;
    if map.is_empty() {
        return Ok(Vec::new());
    }

    let co_citation_weight = refine_with_co_citation(
        search,
        Arc::clone(&map),
        seed_recid,
        &options.cocitation,
        options.concurrency,
        progress,
        cancel,
    )
    .await?;

    let candidates: Vec<CandidateAggregate> = match Arc::try_unwrap(map) {
        Ok(map) => map.into_iter().map(|(_, agg)| agg).collect(),
        Err(shared) => shared.iter().map(|r| r.value().clone()).collect(),
    };
    let mut results = rank(
        &candidates,
        options.max_results,
        RankWeights {
            total_anchor_weight,
            co_citation_weight,
        },
    );

    if let Some(host) = &options.host {
        for entry in &mut results {
            if let Some(recid) = &entry.recid {
                entry.local_link = host.local_link(recid);
            }
        }
    }

    tracing::info!(
        seed = seed_recid,
        candidates = candidates.len(),
        results = results.len(),
        co_citation_weight,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "related records ranked"
    );
    Ok(results)
}

/// Fetch and normalize the reference list of `seed_recid`.
///
/// Pages through up to [`MAX_REFERENCE_PAGES`] pages. A failed page ends the
/// listing with what was collected so far.
pub async fn fetch_seed_references(
    search: &dyn LiteratureSearch,
    seed_recid: &str,
    cancel: &CancellationToken,
) -> Result<Vec<ReferenceEntry>, CoreError> {
    let seed_recid = seed_recid.trim();
    if !is_valid_recid(seed_recid) {
        return Err(CoreError::Config(format!(
            "invalid record id {seed_recid:?}"
        )));
    }

    let mut references = Vec::new();
    for page in 1..=MAX_REFERENCE_PAGES {
        let request =
            SearchRequest::new(query::references_of(seed_recid), REFERENCE_PAGE_SIZE).with_page(page);
        let Some(result) = search_or_cancel(search, &request, cancel).await? else {
            break;
        };
        let received = result.hits.len();
        references.extend(result.hits.iter().map(normalize_hit));
        if received < REFERENCE_PAGE_SIZE || references.len() as u64 >= result.total {
            break;
        }
    }

    tracing::debug!(
        seed = seed_recid,
        references = references.len(),
        "seed references fetched"
    );
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RawHit;
    use crate::search::mock::{MockResponse, MockSearch, hit};

    #[tokio::test]
    async fn seed_references_single_page() {
        let search = MockSearch::new(MockResponse::Empty)
            .with_hits("citedby:recid:9", vec![hit(1, "One", 3), hit(2, "Two", 4)]);
        let refs = fetch_seed_references(&search, "9", &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["inspire:1", "inspire:2"]);
        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn seed_references_page_cap() {
        let full: Vec<RawHit> = (0..REFERENCE_PAGE_SIZE as u64)
            .map(|i| hit(i, "Ref", 1))
            .collect();
        let search = MockSearch::new(MockResponse::Page {
            hits: full,
            total: 5000,
        });
        let refs = fetch_seed_references(&search, "9", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(search.call_count(), MAX_REFERENCE_PAGES);
        assert_eq!(refs.len(), REFERENCE_PAGE_SIZE * MAX_REFERENCE_PAGES);
    }

    #[tokio::test]
    async fn seed_references_reject_bad_recid() {
        let search = MockSearch::new(MockResponse::Empty);
        let err = fetch_seed_references(&search, "1 or 2", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_seed_yields_nothing() {
        let search = Arc::new(MockSearch::new(MockResponse::Empty));
        let refs = vec![ReferenceEntry {
            id: "inspire:5".into(),
            recid: Some("5".into()),
            title: "Ref".into(),
            citation_count: Some(50),
            ..Default::default()
        }];
        let out = fetch_related(
            search.clone(),
            "  ",
            &refs,
            &RelatedOptions::default(),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(out.is_empty());
        assert_eq!(search.call_count(), 0);
    }
}
