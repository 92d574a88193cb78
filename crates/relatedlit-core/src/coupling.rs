//! Weighted bibliographic coupling over a striped worker pool.
//!
//! Each anchor gets one "records citing this anchor" search. Hits
//! are folded into a sharded [`CandidateMap`] keyed by record id, so workers
//! only contend on the shard holding the candidate they are updating.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::normalize::normalize_hit;
use crate::query;
use crate::rank::{RankWeights, rank};
use crate::review::{is_generic_review_title, is_review_like};
use crate::search::{LiteratureSearch, RawHit, SearchRequest, SortOrder, search_or_cancel};
use crate::{Anchor, CoreError, ProgressEvent, ProgressSender, ReferenceEntry};

/// Anchor titles remembered per candidate as "why recommended".
pub const MAX_SHARED_TITLES: usize = 3;

/// Per-candidate accumulator.
#[derive(Debug, Clone)]
pub struct CandidateAggregate {
    pub entry: ReferenceEntry,
    /// Anchors already counted for this candidate.
    pub contributing_anchors: HashSet<String>,
    pub shared_count: usize,
    pub weighted_score: f64,
    pub shared_titles: Vec<String>,
    pub co_citation_count: Option<u64>,
    pub co_citation_score: Option<f64>,
}

impl CandidateAggregate {
    pub fn new(entry: ReferenceEntry) -> Self {
        Self {
            entry,
            contributing_anchors: HashSet::new(),
            shared_count: 0,
            weighted_score: 0.0,
            shared_titles: Vec::new(),
            co_citation_count: None,
            co_citation_score: None,
        }
    }

    /// Credit `anchor` to this candidate. Returns false if it was already counted.
    pub fn record_anchor(&mut self, anchor: &Anchor) -> bool {
        if !self.contributing_anchors.insert(anchor.recid.clone()) {
            return false;
        }
        self.shared_count += 1;
        self.weighted_score += anchor.weight;
        if self.shared_titles.len() < MAX_SHARED_TITLES && !anchor.title.is_empty() {
            self.shared_titles.push(anchor.title.clone());
        }
        true
    }
}

/// Candidates keyed by record id.
pub type CandidateMap = DashMap<String, CandidateAggregate>;

#[derive(Debug, Clone)]
pub struct CouplingParams {
    pub seed_recid: String,
    /// The seed's own references; never recommended.
    pub excluded_recids: HashSet<String>,
    pub per_anchor: usize,
    pub concurrency: usize,
    pub exclude_review_articles: bool,
    /// Entries carried by each progress snapshot.
    pub snapshot_size: usize,
    pub progress_interval: Duration,
}

impl Default for CouplingParams {
    fn default() -> Self {
        Self {
            seed_recid: String::new(),
            excluded_recids: HashSet::new(),
            per_anchor: 25,
            concurrency: 2,
            exclude_review_articles: true,
            snapshot_size: 50,
            progress_interval: Duration::from_millis(200),
        }
    }
}

/// Fold one anchor's citing records into `map`. Returns how many candidates
/// were credited with the anchor.
pub fn absorb_hits(
    map: &CandidateMap,
    anchor: &Anchor,
    hits: &[RawHit],
    params: &CouplingParams,
) -> usize {
    let mut credited = 0;
    for hit in hits {
        let entry = normalize_hit(hit);
        let Some(recid) = entry.recid.clone() else {
            continue;
        };
        if let Some(reason) = skip_reason(&recid, &entry, params) {
            tracing::debug!(candidate = %recid, anchor = %anchor.recid, reason, "candidate skipped");
            continue;
        }

        let mut aggregate = map
            .entry(recid)
            .or_insert_with(|| CandidateAggregate::new(entry));
        if aggregate.record_anchor(anchor) {
            credited += 1;
        }
    }
    credited
}

fn skip_reason(recid: &str, entry: &ReferenceEntry, params: &CouplingParams) -> Option<&'static str> {
    if recid == params.seed_recid {
        Some("seed")
    } else if params.excluded_recids.contains(recid) {
        Some("seed reference")
    } else if is_generic_review_title(&entry.title) {
        Some("generic review")
    } else if params.exclude_review_articles && is_review_like(entry) {
        Some("review")
    } else {
        None
    }
}

/// Snapshot of every aggregate currently in `map`.
pub fn collect_candidates(map: &CandidateMap) -> Vec<CandidateAggregate> {
    map.iter().map(|r| r.value().clone()).collect()
}

/// Throttled progress snapshots. Sends happen under the lock so
/// `processed_anchors` is non-decreasing on the receiving side.
struct ProgressTracker {
    sender: Option<ProgressSender>,
    state: Mutex<TrackerState>,
    total_anchors: usize,
    total_weight: f64,
    snapshot_size: usize,
    interval: Duration,
}

struct TrackerState {
    processed: usize,
    last_emit: Option<Instant>,
    final_sent: bool,
}

impl ProgressTracker {
    fn new(sender: Option<ProgressSender>, anchors: &[Anchor], params: &CouplingParams) -> Self {
        Self {
            sender,
            state: Mutex::new(TrackerState {
                processed: 0,
                last_emit: None,
                final_sent: false,
            }),
            total_anchors: anchors.len(),
            total_weight: anchors.iter().map(|a| a.weight).sum(),
            snapshot_size: params.snapshot_size,
            interval: params.progress_interval,
        }
    }

    fn anchor_done(&self, map: &CandidateMap) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processed += 1;

        let finished = state.processed >= self.total_anchors;
        let due = state
            .last_emit
            .is_none_or(|t| t.elapsed() >= self.interval);
        if finished || due {
            self.emit(&mut state, map, finished);
        }
    }

    /// Send the closing snapshot if no worker got to send it, e.g. because
    /// one of them died with anchors left over.
    fn finish(&self, map: &CandidateMap) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.final_sent {
            self.emit(&mut state, map, true);
        }
    }

    fn emit(&self, state: &mut TrackerState, map: &CandidateMap, last: bool) {
        let Some(sender) = &self.sender else {
            return;
        };
        state.last_emit = Some(Instant::now());
        state.final_sent |= last;

        let entries = rank(
            &collect_candidates(map),
            self.snapshot_size,
            RankWeights {
                total_anchor_weight: self.total_weight,
                co_citation_weight: 0.0,
            },
        );
        sender.emit(ProgressEvent::Snapshot {
            processed_anchors: state.processed,
            total_anchors: self.total_anchors,
            entries,
        });
    }
}

/// Search every anchor and aggregate the citing records.
///
/// Runs `min(concurrency, anchors)` workers; worker `w` handles anchors
/// `w, w + pool, w + 2 * pool, ...`. A failed anchor search contributes no
/// hits, and a worker that panics loses its remaining anchors. Exactly one
/// snapshot marks completion. Returns [`CoreError::Cancelled`] if `cancel`
/// fires before all workers finish.
pub async fn aggregate_coupling(
    search: Arc<dyn LiteratureSearch>,
    anchors: Arc<Vec<Anchor>>,
    params: Arc<CouplingParams>,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
) -> Result<Arc<CandidateMap>, CoreError> {
    let map = Arc::new(CandidateMap::new());
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    if anchors.is_empty() {
        return Ok(map);
    }

    let pool = params.concurrency.max(1).min(anchors.len());
    let tracker = Arc::new(ProgressTracker::new(progress, &anchors, &params));
    let mut workers = JoinSet::new();

    for worker in 0..pool {
        let search = Arc::clone(&search);
        let anchors = Arc::clone(&anchors);
        let params = Arc::clone(&params);
        let map = Arc::clone(&map);
        let tracker = Arc::clone(&tracker);
        let cancel = cancel.clone();

        workers.spawn(async move {
            for anchor in anchors.iter().skip(worker).step_by(pool) {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                let request = SearchRequest::new(query::citing(&anchor.recid), params.per_anchor)
                    .with_sort(SortOrder::MostCited);
                let hits = search_or_cancel(search.as_ref(), &request, &cancel)
                    .await?
                    .map(|page| page.hits)
                    .unwrap_or_default();

                let credited = absorb_hits(&map, anchor, &hits, &params);
                tracing::debug!(
                    worker,
                    anchor = %anchor.recid,
                    hits = hits.len(),
                    credited,
                    "anchor processed"
                );
                tracker.anchor_done(&map);
            }
            Ok(())
        });
    }

    let mut outcome: Result<(), CoreError> = Ok(());
    let mut panicked = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                workers.abort_all();
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
            Err(e) if e.is_panic() => {
                panicked += 1;
                tracing::error!(error = %e, "coupling worker panicked");
            }
            Err(_) => {}
        }
    }
    outcome?;
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    tracker.finish(&map);

    tracing::info!(
        anchors = anchors.len(),
        panicked,
        workers = pool,
        candidates = map.len(),
        "coupling complete"
    );
    Ok(map)
}
