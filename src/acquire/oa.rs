//! Open-access status resolution from a DOI.
//!
//! Before the PDF-repository stage runs, the DOI is resolved to an
//! open-access indicator: a repository identifier (PMCID) and any directly
//! advertised PDF links. Crossref is consulted first; the archive's id
//! converter fills in a PMCID when Crossref does not expose one. Resolution
//! is best-effort: failures collapse to "not open access" rather than
//! aborting the chain.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::download::{HttpClient, RetryPolicy, ServiceRateLimiter, with_retry};

/// Rate-limiter service name for Crossref calls.
const CROSSREF_SERVICE: &str = "crossref";

/// Rate-limiter service name for id-converter calls.
const IDCONV_SERVICE: &str = "pubmed";

#[allow(clippy::expect_used)]
static PMCID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PMC(\d+)").expect("static pattern must compile"));

/// Open-access indicators resolved for one DOI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenAccessStatus {
    /// True when any indicator marks the work as openly accessible.
    pub is_open_access: bool,
    /// Repository identifier (digits only, without the `PMC` prefix).
    pub pmcid: Option<String>,
    /// License URL, when Crossref advertises one.
    pub license: Option<String>,
    /// PDF links advertised directly in the work's metadata.
    pub pdf_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefWork,
}

#[derive(Debug, Default, Deserialize)]
struct CrossrefWork {
    #[serde(default)]
    license: Vec<CrossrefLicense>,
    #[serde(default)]
    link: Vec<CrossrefLink>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLicense {
    #[serde(rename = "URL", default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL", default)]
    url: String,
    #[serde(rename = "content-type", default)]
    content_type: String,
}

#[derive(Debug, Deserialize)]
struct IdconvResponse {
    #[serde(default)]
    records: Vec<IdconvRecord>,
}

#[derive(Debug, Deserialize)]
struct IdconvRecord {
    #[serde(default)]
    pmcid: Option<String>,
}

/// Resolves open-access indicators for DOIs.
#[derive(Debug, Clone)]
pub struct OaResolver {
    client: HttpClient,
    limiter: Arc<ServiceRateLimiter>,
    retry: RetryPolicy,
    crossref_base: String,
    idconv_base: String,
}

impl OaResolver {
    /// Default Crossref works endpoint base.
    pub const DEFAULT_CROSSREF_BASE: &'static str = "https://api.crossref.org";

    /// Default id-converter endpoint base.
    pub const DEFAULT_IDCONV_BASE: &'static str =
        "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0";

    /// Creates a resolver against specific endpoint bases (test seam).
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<ServiceRateLimiter>,
        retry: RetryPolicy,
        crossref_base: impl Into<String>,
        idconv_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            crossref_base: crossref_base.into(),
            idconv_base: idconv_base.into(),
        }
    }

    /// Resolves a DOI's open-access indicators, best-effort.
    #[instrument(skip(self))]
    pub async fn resolve(&self, doi: &str) -> OpenAccessStatus {
        let mut status = OpenAccessStatus::default();

        match self.query_crossref(doi).await {
            Ok(work) => {
                if let Some(license) = work.license.first() {
                    let url = license.url.to_lowercase();
                    if url.contains("cc-by") || url.contains("creativecommons") {
                        status.is_open_access = true;
                    }
                    status.license = Some(license.url.clone());
                }
                for link in &work.link {
                    if link.content_type == "application/pdf" && !link.url.is_empty() {
                        status.pdf_urls.push(link.url.clone());
                    }
                    if link.url.to_lowercase().contains("pmc")
                        && let Some(pmcid) = extract_pmcid(&link.url)
                    {
                        status.pmcid = Some(pmcid);
                        status.is_open_access = true;
                    }
                }
            }
            Err(error) => warn!(doi, %error, "Crossref lookup failed"),
        }

        if status.pmcid.is_none() {
            match self.query_idconv(doi).await {
                Ok(Some(pmcid)) => {
                    debug!(doi, pmcid, "id converter resolved a PMCID");
                    status.pmcid = Some(pmcid);
                    status.is_open_access = true;
                }
                Ok(None) => {}
                Err(error) => warn!(doi, %error, "id converter lookup failed"),
            }
        }

        debug!(
            doi,
            open_access = status.is_open_access,
            pmcid = status.pmcid.as_deref().unwrap_or("-"),
            pdf_links = status.pdf_urls.len(),
            "open-access resolution complete"
        );
        status
    }

    async fn query_crossref(&self, doi: &str) -> Result<CrossrefWork, crate::download::FetchError> {
        let url = format!(
            "{}/works/{}",
            self.crossref_base.trim_end_matches('/'),
            urlencoding::encode(doi)
        );
        let response = with_retry(&self.retry, &self.limiter, CROSSREF_SERVICE, || {
            self.client.get_json::<CrossrefResponse>(&url)
        })
        .await?;
        Ok(response.message)
    }

    async fn query_idconv(
        &self,
        doi: &str,
    ) -> Result<Option<String>, crate::download::FetchError> {
        let url = format!(
            "{}/?tool=pubminer&email=pubminer@example.com&ids={}&format=json",
            self.idconv_base.trim_end_matches('/'),
            urlencoding::encode(doi)
        );
        let response = with_retry(&self.retry, &self.limiter, IDCONV_SERVICE, || {
            self.client.get_json::<IdconvResponse>(&url)
        })
        .await?;
        Ok(response
            .records
            .first()
            .and_then(|r| r.pmcid.as_deref())
            .and_then(extract_pmcid))
    }
}

/// Pulls the digits out of a `PMC1234567`-style identifier or URL.
#[must_use]
pub fn extract_pmcid(value: &str) -> Option<String> {
    PMCID_RE
        .captures(value)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}
