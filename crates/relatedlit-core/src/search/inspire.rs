use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{LiteratureSearch, RawHit, SearchError, SearchPage, SearchRequest};
use super::rate_limit::{QuotaLimiter, RequestQuota, check_rate_limit_response, retry_wait};

pub const DEFAULT_BASE_URL: &str = "https://inspirehep.net";

/// Metadata fields requested for every hit.
const FIELDS: &str = "control_number,titles.title,authors.full_name,authors.inspire_roles,\
author_count,publication_info,citation_count,citation_count_without_self_citations,\
document_type,dois.value,arxiv_eprints.value,earliest_date";

/// Connection settings for [`InspireClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct InspireConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Requests allowed per `window_secs`.
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub user_agent: String,
}

impl Default for InspireConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 15,
            requests_per_window: RequestQuota::INSPIRE.requests,
            window_secs: RequestQuota::INSPIRE.window.as_secs(),
            user_agent: concat!("relatedlit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl InspireConfig {
    pub fn quota(&self) -> RequestQuota {
        RequestQuota {
            requests: self.requests_per_window.max(1),
            window: Duration::from_secs(self.window_secs.max(1)),
        }
    }
}

/// Literature search over the INSPIRE-HEP REST API.
pub struct InspireClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
    limiter: QuotaLimiter,
}

impl InspireClient {
    pub fn new(config: &InspireConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            limiter: QuotaLimiter::new(config.quota()),
        }
    }

    /// Full request URL for a search request.
    pub fn search_url(&self, request: &SearchRequest) -> String {
        format!(
            "{}/api/literature?q={}&size={}&sort={}&page={}&fields={}",
            self.base_url,
            urlencoding::encode(&request.query),
            request.size,
            request.sort.as_str(),
            request.page.max(1),
            FIELDS,
        )
    }

    /// Rate-limited query with a single retry after a 429.
    async fn query_with_rate_limit(
        &self,
        request: &SearchRequest,
    ) -> Result<SearchPage, SearchError> {
        self.limiter.acquire().await;

        match self.fetch_once(request).await {
            Err(SearchError::RateLimited { retry_after }) => {
                self.limiter.on_rate_limited();
                let wait = retry_wait(retry_after, self.limiter.current().window, self.timeout);
                tracing::info!(
                    query = %request.query,
                    wait_secs = wait.as_secs_f64(),
                    quota = self.limiter.current().requests,
                    "INSPIRE rate limited, waiting then retrying"
                );
                tokio::time::sleep(wait).await;
                self.limiter.acquire().await;
                self.fetch_once(request).await
            }
            other => other,
        }
    }

    async fn fetch_once(&self, request: &SearchRequest) -> Result<SearchPage, SearchError> {
        let url = self.search_url(request);
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(SearchPage::default());
        }
        check_rate_limit_response(&resp)?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SearchError::Http(e.to_string()))?;
        parse_search_response(&body)
    }
}

impl LiteratureSearch for InspireClient {
    fn name(&self) -> &str {
        "INSPIRE"
    }

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<SearchPage, SearchError>> + Send + 'a>> {
        Box::pin(async move {
            // Dropping the request future aborts the underlying HTTP call.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SearchError::Cancelled),
                result = self.query_with_rate_limit(request) => result,
            }
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<HitRecord>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct HitRecord {
    #[serde(default)]
    metadata: RawHit,
}

/// Parse a `/api/literature` response body.
pub fn parse_search_response(body: &str) -> Result<SearchPage, SearchError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(SearchPage {
        hits: parsed.hits.hits.into_iter().map(|h| h.metadata).collect(),
        total: parsed.hits.total,
    })
}
