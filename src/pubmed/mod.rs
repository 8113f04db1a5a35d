//! Bibliographic metadata source.
//!
//! The pipeline consumes metadata through the [`MetadataSource`] trait:
//! search a query for identifiers, then fetch full records for an id list.
//! The provided [`PubMedClient`] speaks the E-utilities protocol (esearch
//! for paging through results, efetch in Medline format for records), rate
//! limited under the `"pubmed"` service name.

pub mod medline;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::PubMedConfig;
use crate::download::{FetchError, HttpClient, RetryPolicy, ServiceRateLimiter, with_retry};
use crate::record::PaperRecord;

pub use medline::parse_medline;

/// Rate-limiter service name for E-utilities traffic.
pub const PUBMED_SERVICE: &str = "pubmed";

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Total result count for the query.
    pub count: usize,
    /// Identifiers on this page.
    pub ids: Vec<String>,
}

/// The bibliographic metadata seam.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Searches for records matching a query.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for transport failures that survive retries.
    async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, FetchError>;

    /// Fetches full records for an identifier list.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for transport failures that survive retries.
    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<PaperRecord>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

/// E-utilities metadata client.
#[derive(Debug, Clone)]
pub struct PubMedClient {
    client: HttpClient,
    limiter: Arc<ServiceRateLimiter>,
    retry: RetryPolicy,
    config: PubMedConfig,
}

impl PubMedClient {
    /// Creates a client from its configuration (base URL is a test seam).
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<ServiceRateLimiter>,
        retry: RetryPolicy,
        config: PubMedConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            config,
        }
    }

    fn api_key_param(&self) -> String {
        if self.config.api_key.is_empty() {
            String::new()
        } else {
            format!("&api_key={}", self.config.api_key)
        }
    }
}

#[async_trait]
impl MetadataSource for PubMedClient {
    #[instrument(skip(self))]
    async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, FetchError> {
        let url = format!(
            "{}/esearch.fcgi?db=pubmed&term={}&retstart={}&retmax={}&retmode=json{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            offset,
            limit,
            self.api_key_param(),
        );

        let response = with_retry(&self.retry, &self.limiter, PUBMED_SERVICE, || {
            self.client.get_json::<EsearchResponse>(&url)
        })
        .await?;

        let count = response
            .esearchresult
            .count
            .parse::<usize>()
            .unwrap_or_default();
        debug!(count, page = response.esearchresult.idlist.len(), "search page fetched");
        Ok(SearchPage {
            count,
            ids: response.esearchresult.idlist,
        })
    }

    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<PaperRecord>, FetchError> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.fetch_batch_size.max(1)) {
            let url = format!(
                "{}/efetch.fcgi?db=pubmed&id={}&rettype=medline&retmode=text{}",
                self.config.base_url.trim_end_matches('/'),
                chunk.join(","),
                self.api_key_param(),
            );

            let page = with_retry(&self.retry, &self.limiter, PUBMED_SERVICE, || {
                self.client.get_text(&url, None)
            })
            .await?;
            records.extend(parse_medline(&page.body));
        }
        Ok(records)
    }
}
