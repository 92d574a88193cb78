//! Mock search backend for testing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{
    LiteratureSearch, RawHit, RawIdentifier, RawTitle, SearchError, SearchPage, SearchRequest,
};

/// A configurable mock response for [`MockSearch`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return these hits (truncated to the request size) and this total.
    Page { hits: Vec<RawHit>, total: u64 },
    /// No matches.
    Empty,
    /// Fail with this error.
    Error(SearchError),
}

/// A hand-rolled mock implementing [`LiteratureSearch`] for tests.
///
/// Responses are keyed by the exact query string; unknown queries get the
/// fallback. Every call is counted and its query recorded.
pub struct MockSearch {
    responses: Mutex<HashMap<String, MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    /// Create a mock that answers every query with `fallback`.
    pub fn new(fallback: MockResponse) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Answer `query` with `response`.
    pub fn with_response(self, query: impl Into<String>, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(query.into(), response);
        self
    }

    /// Answer `query` with a page of `hits` whose total is the hit count.
    pub fn with_hits(self, query: impl Into<String>, hits: Vec<RawHit>) -> Self {
        let total = hits.len() as u64;
        self.with_response(query, MockResponse::Page { hits, total })
    }

    /// Answer `query` with an empty page reporting `total` matches.
    pub fn with_total(self, query: impl Into<String>, total: u64) -> Self {
        self.with_response(query, MockResponse::Page { hits: vec![], total })
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `search()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn response_for(&self, query: &str) -> MockResponse {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl LiteratureSearch for MockSearch {
    fn name(&self) -> &str {
        "mock"
    }

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
        _cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.query.clone());
        let response = self.response_for(&request.query);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Page { mut hits, total } => {
                    hits.truncate(request.size);
                    Ok(SearchPage { hits, total })
                }
                MockResponse::Empty => Ok(SearchPage::default()),
                MockResponse::Error(e) => Err(e),
            }
        })
    }
}

/// Build a minimal raw hit with a record id, a title and a citation count.
pub fn hit(recid: u64, title: &str, citations: u32) -> RawHit {
    RawHit {
        control_number: Some(recid),
        titles: vec![RawTitle {
            title: title.to_string(),
        }],
        citation_count: Some(citations),
        ..Default::default()
    }
}

/// Like [`hit`], with a DOI attached.
pub fn hit_with_doi(recid: u64, title: &str, citations: u32, doi: &str) -> RawHit {
    RawHit {
        dois: vec![RawIdentifier {
            value: doi.to_string(),
        }],
        ..hit(recid, title, citations)
    }
}
