use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod anchors;
pub mod cocitation;
pub mod config_file;
pub mod coupling;
pub mod normalize;
pub mod query;
pub mod rank;
pub mod related;
pub mod review;
pub mod search;

// Re-export for convenience
pub use anchors::{AnchorOptions, AnchorTuning, select_anchors};
pub use cocitation::CoCitationParams;
pub use coupling::{CandidateAggregate, CandidateMap};
pub use rank::{RankWeights, rank};
pub use review::{is_generic_review_title, is_review_like};
pub use search::inspire::{InspireClient, InspireConfig};
pub use search::{LiteratureSearch, RawHit, SearchError, SearchPage, SearchRequest, SortOrder};

/// A normalized literature record.
///
/// The scoring fields (`shared_ref_count` through `combined_score`) are only
/// populated on entries returned by the ranker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: String,
    pub recid: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    /// Total number of authors when `authors` was truncated.
    pub author_count: Option<u32>,
    pub year: Option<u32>,
    pub citation_count: Option<u32>,
    pub citation_count_without_self: Option<u32>,
    pub document_type: Vec<String>,
    pub journal_title: Option<String>,
    pub publication_info: Option<String>,
    pub errata: Vec<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub inspire_url: Option<String>,
    pub doi_url: Option<String>,
    pub arxiv_url: Option<String>,
    /// Link into the caller's own library, when the record is already there.
    pub local_link: Option<String>,

    pub shared_ref_count: Option<usize>,
    pub shared_ref_titles: Vec<String>,
    pub coupling_score: Option<f64>,
    pub co_citation_count: Option<u64>,
    pub co_citation_score: Option<f64>,
    pub combined_score: Option<f64>,
}

impl ReferenceEntry {
    /// Citation count used for ranking: self-citations excluded when known.
    pub fn best_citation_count(&self) -> Option<u32> {
        self.citation_count_without_self.or(self.citation_count)
    }
}

/// A seed reference whose citing records are searched for bibliographic coupling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub recid: String,
    pub title: String,
    /// In `(0, 1]`, non-increasing in the anchor's citation count.
    pub weight: f64,
    pub citations: Option<u32>,
}

/// Progress events emitted while a request runs.
///
/// Delivered over an `async_channel`; the stream ends when the pipeline
/// drops its sender.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    AnchorsSelected {
        count: usize,
    },
    /// Best-effort ranking after `processed_anchors` anchors were fetched.
    /// `processed_anchors` never decreases between snapshots.
    Snapshot {
        processed_anchors: usize,
        total_anchors: usize,
        entries: Vec<ReferenceEntry>,
    },
    CoCitation {
        processed: usize,
        total: usize,
    },
}

/// Sending half of a progress stream, created by [`progress_channel`].
///
/// The channel is always unbounded, so every event the pipeline emits is
/// delivered, including the final coupling snapshot.
#[derive(Debug, Clone)]
pub struct ProgressSender(async_channel::Sender<ProgressEvent>);

impl ProgressSender {
    /// Queue `event` without waiting. Fails only once the receiver is gone.
    pub(crate) fn emit(&self, event: ProgressEvent) {
        if self.0.try_send(event).is_err() {
            tracing::trace!("progress receiver dropped");
        }
    }
}

/// A progress stream for [`fetch_related`]. The receiver yields events until
/// the pipeline drops its sender.
pub fn progress_channel() -> (ProgressSender, async_channel::Receiver<ProgressEvent>) {
    let (tx, rx) = async_channel::unbounded();
    (ProgressSender(tx), rx)
}

#[derive(Error, Debug)]
pub enum CoreError {
    /// The shared cancellation token fired. Not a recommendation-quality failure.
    #[error("request cancelled")]
    Cancelled,
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

/// Read-only view of the caller's own library.
pub trait HostLibrary: Send + Sync {
    /// Record ids the seed is known to cite beyond the supplied reference list.
    fn seed_reference_ids(&self) -> HashSet<String>;

    /// Link to the caller's copy of a record, if it has one.
    fn local_link(&self, recid: &str) -> Option<String>;
}

/// Options for a related-papers request.
#[derive(Clone)]
pub struct RelatedOptions {
    pub max_anchors: usize,
    pub per_anchor: usize,
    pub max_results: usize,
    pub exclude_review_articles: bool,
    pub concurrency: usize,
    pub anchor_tuning: AnchorTuning,
    pub cocitation: CoCitationParams,
    /// Minimum spacing between coupling snapshots. The final snapshot is always sent.
    pub progress_interval: Duration,
    pub host: Option<Arc<dyn HostLibrary>>,
}

impl std::fmt::Debug for RelatedOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelatedOptions")
            .field("max_anchors", &self.max_anchors)
            .field("per_anchor", &self.per_anchor)
            .field("max_results", &self.max_results)
            .field("exclude_review_articles", &self.exclude_review_articles)
            .field("concurrency", &self.concurrency)
            .field("anchor_tuning", &self.anchor_tuning)
            .field("cocitation", &self.cocitation)
            .field("progress_interval", &self.progress_interval)
            .field("host", &self.host.as_ref().map(|_| "<host>"))
            .finish()
    }
}

impl Default for RelatedOptions {
    fn default() -> Self {
        Self {
            max_anchors: 15,
            per_anchor: 25,
            max_results: 50,
            exclude_review_articles: true,
            concurrency: 2,
            anchor_tuning: AnchorTuning::default(),
            cocitation: CoCitationParams::default(),
            progress_interval: Duration::from_millis(200),
            host: None,
        }
    }
}

impl RelatedOptions {
    pub fn anchor_options(&self) -> AnchorOptions {
        AnchorOptions {
            exclude_review_articles: self.exclude_review_articles,
            tuning: self.anchor_tuning.clone(),
        }
    }
}

/// Recommend records related to `seed_recid` through its bibliography.
///
/// Progress events are sent on `progress` if given; see [`progress_channel`].
/// The call rejects with
/// [`CoreError::Cancelled`] once `cancel` fires; every other upstream failure
/// degrades to fewer candidates.
pub async fn fetch_related(
    search: Arc<dyn LiteratureSearch>,
    seed_recid: &str,
    seed_references: &[ReferenceEntry],
    options: &RelatedOptions,
    progress: Option<ProgressSender>,
    cancel: CancellationToken,
) -> Result<Vec<ReferenceEntry>, CoreError> {
    related::fetch_related(
        search,
        seed_recid,
        seed_references,
        options,
        progress,
        cancel,
    )
    .await
}
