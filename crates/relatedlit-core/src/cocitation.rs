//! Co-citation re-ranking of the best coupling candidates.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::coupling::CandidateMap;
use crate::query;
use crate::search::{LiteratureSearch, SearchRequest, search_or_cancel};
use crate::{CoreError, ProgressEvent, ProgressSender};

/// Upper bound of the co-citation blend weight.
pub const MAX_BLEND_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct CoCitationParams {
    pub enabled: bool,
    /// Candidates refined, best coupling scores first.
    pub budget: usize,
    /// Below this many citing records the phase is skipped.
    pub min_seed_citing: u64,
    /// Clamped to `[0, MAX_BLEND_WEIGHT]`.
    pub max_weight: f64,
    /// Seed citing count at which the blend weight saturates.
    pub saturation: u64,
    pub score_scale: f64,
}

impl Default for CoCitationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            budget: 30,
            min_seed_citing: 10,
            max_weight: MAX_BLEND_WEIGHT,
            saturation: 1000,
            score_scale: 4.0,
        }
    }
}

/// Blend weight for a seed cited by `seed_citing` records.
///
/// 0 below `min_seed_citing`, otherwise grows logarithmically up to
/// `max_weight` at `saturation`.
pub fn blend_weight(seed_citing: u64, params: &CoCitationParams) -> f64 {
    if !params.enabled || seed_citing < params.min_seed_citing || seed_citing == 0 {
        return 0.0;
    }
    let max_weight = params.max_weight.clamp(0.0, MAX_BLEND_WEIGHT);
    let saturation = (1.0 + params.saturation as f64).ln();
    let ratio = if saturation > 0.0 {
        ((1.0 + seed_citing as f64).ln() / saturation).min(1.0)
    } else {
        1.0
    };
    max_weight * ratio
}

/// Scaled cosine similarity of the two citing sets, in `[0, 1]`.
///
/// `candidate_total` is raised to `co_cited` when it reports fewer.
pub fn co_citation_score(co_cited: u64, seed_total: u64, candidate_total: u64, scale: f64) -> f64 {
    let candidate_total = candidate_total.max(co_cited);
    if seed_total == 0 || candidate_total == 0 {
        return 0.0;
    }
    let denom = (seed_total as f64 * candidate_total as f64).sqrt();
    (scale.max(0.0) * co_cited as f64 / denom).clamp(0.0, 1.0)
}

struct Target {
    recid: String,
    citations: u64,
}

/// Refine the top candidates with co-citation counts.
///
/// Returns the blend weight to rank with; 0 means the phase was skipped.
/// A failed lookup leaves that candidate's score unset.
pub async fn refine_with_co_citation(
    search: Arc<dyn LiteratureSearch>,
    map: Arc<CandidateMap>,
    seed_recid: &str,
    params: &CoCitationParams,
    concurrency: usize,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
) -> Result<f64, CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    if !params.enabled || params.budget == 0 || map.is_empty() {
        return Ok(0.0);
    }

    let seed_request = SearchRequest::new(query::citing(seed_recid), 1);
    let Some(seed_page) = search_or_cancel(search.as_ref(), &seed_request, &cancel).await? else {
        return Ok(0.0);
    };
    let seed_total = seed_page.total;
    let weight = blend_weight(seed_total, params);
    if weight <= 0.0 {
        tracing::debug!(seed_total, "seed too rarely cited, skipping co-citation");
        return Ok(0.0);
    }

    let targets = Arc::new(top_targets(&map, params.budget));
    if targets.is_empty() {
        return Ok(0.0);
    }

    let pool = concurrency.max(1).min(targets.len());
    let processed = Arc::new(Mutex::new(0usize));
    let mut workers = JoinSet::new();

    for worker in 0..pool {
        let search = Arc::clone(&search);
        let targets = Arc::clone(&targets);
        let map = Arc::clone(&map);
        let processed = Arc::clone(&processed);
        let progress = progress.clone();
        let cancel = cancel.clone();
        let seed_recid = seed_recid.to_string();
        let scale = params.score_scale;

        workers.spawn(async move {
            for target in targets.iter().skip(worker).step_by(pool) {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                let request = SearchRequest::new(query::citing_both(&seed_recid, &target.recid), 1);
                if let Some(page) = search_or_cancel(search.as_ref(), &request, &cancel).await? {
                    let score = co_citation_score(page.total, seed_total, target.citations, scale);
                    if let Some(mut aggregate) = map.get_mut(&target.recid) {
                        aggregate.co_citation_count = Some(page.total);
                        aggregate.co_citation_score = Some(score);
                    }
                }

                let mut done = processed.lock().unwrap_or_else(|e| e.into_inner());
                *done += 1;
                if let Some(sender) = &progress {
                    sender.emit(ProgressEvent::CoCitation {
                        processed: *done,
                        total: targets.len(),
                    });
                }
            }
            Ok(())
        });
    }

    let mut outcome: Result<(), CoreError> = Ok(());
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
                tracing::error!(error = %e, "co-citation worker panicked");
            }
            Err(_) => {}
        }
    }
    outcome?;
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    let done = *processed.lock().unwrap_or_else(|e| e.into_inner());
    if done < targets.len() {
        tracing::warn!(
            refined = done,
            targets = targets.len(),
            "co-citation incomplete, unrefined candidates keep no score"
        );
    }

    tracing::info!(
        seed_total,
        weight,
        refined = targets.len(),
        "co-citation complete"
    );
    Ok(weight)
}

/// The `budget` best candidates by coupling alone, minus uncited ones.
fn top_targets(map: &CandidateMap, budget: usize) -> Vec<Target> {
    let mut ranked: Vec<(String, f64, u64)> = map
        .iter()
        .map(|r| {
            let agg = r.value();
            (
                r.key().clone(),
                agg.weighted_score,
                agg.entry.citation_count.unwrap_or(0) as u64,
            )
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(budget)
        .filter(|(_, _, citations)| *citations > 0)
        .map(|(recid, _, citations)| Target { recid, citations })
        .collect()
}
