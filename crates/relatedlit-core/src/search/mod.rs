//! Literature search collaborator: trait, wire types and the cancellation guard.

pub mod inspire;
pub mod mock;
pub mod rate_limit;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::CoreError;

/// Sort order understood by the search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    MostCited,
    MostRecent,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::MostCited => "mostcited",
            SortOrder::MostRecent => "mostrecent",
        }
    }
}

/// One page request against the search backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub size: usize,
    pub sort: SortOrder,
    /// 1-based.
    pub page: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, size: usize) -> Self {
        Self {
            query: query.into(),
            size,
            sort: SortOrder::MostCited,
            page: 1,
        }
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }
}

/// A page of hits plus the total number of matching records.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<RawHit>,
    pub total: u64,
}

/// Raw record metadata as returned by the backend. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHit {
    pub control_number: Option<u64>,
    pub titles: Vec<RawTitle>,
    pub authors: Vec<RawAuthor>,
    pub author_count: Option<u32>,
    pub publication_info: Vec<RawPublicationInfo>,
    pub citation_count: Option<u32>,
    pub citation_count_without_self_citations: Option<u32>,
    pub document_type: Vec<String>,
    pub dois: Vec<RawIdentifier>,
    pub arxiv_eprints: Vec<RawIdentifier>,
    pub earliest_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTitle {
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAuthor {
    pub full_name: String,
    pub inspire_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPublicationInfo {
    pub journal_title: Option<String>,
    pub journal_volume: Option<String>,
    pub year: Option<u32>,
    pub page_start: Option<String>,
    pub page_end: Option<String>,
    pub artid: Option<String>,
    /// `"erratum"`, `"publication"`, ...
    pub material: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawIdentifier {
    pub value: String,
}

/// Errors from a search backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("search cancelled")]
    Cancelled,
    #[error("rate limited (429){}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP request error: {0}")]
    Http(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

/// A literature search backend.
///
/// Implementations return an empty page, not an error, when nothing matches.
pub trait LiteratureSearch: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>>;
}

/// Run one search, racing it against `cancel`.
///
/// Returns `Ok(None)` for any non-cancellation failure, after logging it: a
/// failed lookup degrades the result instead of aborting the request.
pub(crate) async fn search_or_cancel(
    search: &dyn LiteratureSearch,
    request: &SearchRequest,
    cancel: &CancellationToken,
) -> Result<Option<SearchPage>, CoreError> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SearchError::Cancelled),
        result = search.search(request, cancel) => result,
    };

    match outcome {
        Ok(page) => {
            tracing::debug!(
                backend = search.name(),
                query = %request.query,
                hits = page.hits.len(),
                total = page.total,
                "search complete"
            );
            Ok(Some(page))
        }
        Err(SearchError::Cancelled) => Err(CoreError::Cancelled),
        Err(e) => {
            tracing::warn!(
                backend = search.name(),
                query = %request.query,
                error = %e,
                "search failed, treating as no hits"
            );
            Ok(None)
        }
    }
}
