//! Structured full-text retrieval from the BioC API.
//!
//! The literature archive's BioC endpoint serves machine-readable full text
//! as a list of passages tagged by section. A 404 means "no full text
//! available" and is a normal outcome, not an error; transient statuses are
//! retried with backoff. Fetched documents are cached with a TTL so repeated
//! runs over the same corpus stay cheap.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::cache::DocumentCache;
use crate::download::{FetchError, HttpClient, RetryPolicy, ServiceRateLimiter, with_retry};

/// Rate-limiter service name for the archive's APIs.
pub const BIOC_SERVICE: &str = "pubmed";

/// Cache format tag for BioC JSON documents.
const CACHE_FORMAT: &str = "bioc_json";

/// One BioC collection; the endpoint returns a list of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiocCollection {
    /// Documents in the collection (one per requested id).
    #[serde(default)]
    pub documents: Vec<BiocDocument>,
}

/// One document: an ordered list of tagged passages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiocDocument {
    /// Ordered passages.
    #[serde(default)]
    pub passages: Vec<BiocPassage>,
}

/// One passage of text with its metadata map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiocPassage {
    /// Passage metadata; `section_type` carries the section tag.
    #[serde(default)]
    pub infons: BTreeMap<String, String>,
    /// Passage text.
    #[serde(default)]
    pub text: String,
}

impl BiocPassage {
    /// Returns the passage's section tag, when present.
    #[must_use]
    pub fn section_type(&self) -> Option<&str> {
        self.infons.get("section_type").map(String::as_str)
    }
}

impl BiocDocument {
    /// Returns ordered (`section_tag`, text) pairs for non-empty passages.
    #[must_use]
    pub fn tagged_passages(&self) -> Vec<(String, String)> {
        self.passages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .map(|p| {
                (
                    p.section_type().unwrap_or("UNKNOWN").to_string(),
                    p.text.trim().to_string(),
                )
            })
            .collect()
    }

    /// Returns true when the document carries at least one non-empty passage.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.passages.iter().any(|p| !p.text.trim().is_empty())
    }

    /// Builds a metadata header block from the TITLE passage's infons.
    #[must_use]
    pub fn meta_header(&self) -> String {
        let Some(title_passage) = self
            .passages
            .iter()
            .find(|p| p.section_type() == Some("TITLE"))
        else {
            return String::new();
        };
        let infons = &title_passage.infons;
        let get = |key: &str| infons.get(key).map_or("N/A", String::as_str);

        format!(
            "Title: {}\nDOI: {}\nPMID: {}\nYear: {}\nJournal: {}",
            title_passage.text.trim(),
            get("article-id_doi"),
            get("article-id_pmid"),
            get("year"),
            get("source"),
        )
    }

    /// Renders the document as headed section text, preserving passage order.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut grouped: Vec<(String, Vec<&str>)> = Vec::new();
        for (tag, _) in self.tagged_passages() {
            if !grouped.iter().any(|(t, _)| *t == tag) {
                grouped.push((tag, Vec::new()));
            }
        }
        for passage in &self.passages {
            let text = passage.text.trim();
            if text.is_empty() {
                continue;
            }
            let tag = passage.section_type().unwrap_or("UNKNOWN");
            if let Some((_, texts)) = grouped.iter_mut().find(|(t, _)| t == tag) {
                texts.push(text);
            }
        }

        let mut out = String::new();
        for (tag, texts) in grouped {
            out.push_str(&format!("\n\n===== {tag} =====\n"));
            out.push_str(&texts.join("\n\n"));
        }
        out.trim_start().to_string()
    }
}

/// Client for the structured full-text endpoint.
#[derive(Debug, Clone)]
pub struct BiocClient {
    client: HttpClient,
    limiter: Arc<ServiceRateLimiter>,
    retry: RetryPolicy,
    base_url: String,
    cache: Option<DocumentCache>,
}

impl BiocClient {
    /// Default BioC endpoint base.
    pub const DEFAULT_BASE_URL: &'static str =
        "https://www.ncbi.nlm.nih.gov/research/bionlp/RESTful/pmcoa.cgi";

    /// Creates a client against a specific endpoint base (test seam).
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<ServiceRateLimiter>,
        retry: RetryPolicy,
        base_url: impl Into<String>,
        cache: Option<DocumentCache>,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            base_url: base_url.into(),
            cache,
        }
    }

    /// Fetches the structured document for a PMID.
    ///
    /// Returns `Ok(None)` when the archive has no full text for the id (404)
    /// or the response does not carry at least one non-empty passage.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for transport failures that survive the retry
    /// policy.
    #[instrument(skip(self))]
    pub async fn fetch_document(&self, pmid: &str) -> Result<Option<BiocDocument>, FetchError> {
        if let Some(cache) = &self.cache {
            if let Some(document) = cache.load::<BiocDocument>(pmid, CACHE_FORMAT).await {
                return Ok(Some(document));
            }
        }

        let url = format!(
            "{}/BioC_json/{}/unicode",
            self.base_url.trim_end_matches('/'),
            pmid
        );

        let result = with_retry(&self.retry, &self.limiter, BIOC_SERVICE, || {
            self.client.get_json::<Vec<BiocCollection>>(&url)
        })
        .await;

        let collections = match result {
            Ok(collections) => collections,
            Err(error) if error.is_not_found() => {
                debug!(pmid, "no structured full text available");
                return Ok(None);
            }
            Err(FetchError::BadBody { reason, .. }) => {
                // The endpoint answers some ids with a plain-text notice
                // instead of JSON; that is "no full text", not an error.
                warn!(pmid, %reason, "structured response not in expected shape");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let Some(document) = collections
            .into_iter()
            .flat_map(|c| c.documents)
            .next()
        else {
            warn!(pmid, "structured response contained no documents");
            return Ok(None);
        };

        if !document.has_text() {
            warn!(pmid, "structured document has no non-empty passages");
            return Ok(None);
        }

        if let Some(cache) = &self.cache {
            cache.store(pmid, CACHE_FORMAT, &document).await;
        }
        Ok(Some(document))
    }
}
