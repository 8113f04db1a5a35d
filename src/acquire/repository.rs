//! PDF retrieval from open-access repositories.
//!
//! Given a repository identifier resolved from a DOI, this stage tries, in
//! order: PDF links advertised in the work's metadata, the repository's
//! direct-render endpoints, scraping the article page with the layered
//! strategy list, probing well-known PDF URL patterns, and finally an
//! injected headless renderer for pages defeated by client-side rendering.
//!
//! Every located URL is validated before the bytes are kept: the response
//! must look like a PDF (an HTML body at a PDF URL is treated as a "still
//! preparing" interstitial and retried once), and the downloaded artifact
//! must pass signature/size/page validation or it is deleted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::DownloadAttempt;
use super::strategies::{PageRenderer, discover_pdf_link};
use crate::download::{HttpClient, RetryPolicy, ServiceRateLimiter, persist_validated_pdf,
    with_retry};
use crate::extract::{MIN_TEXT_CHARS, OcrEngine, extract_pdf_text};

/// Delay before re-requesting a PDF URL that answered with HTML.
const INTERSTITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Rate-limiter service name for repository traffic.
const REPOSITORY_SERVICE: &str = "repository";

/// A downloaded, validated PDF with its extracted text.
#[derive(Debug, Clone)]
pub struct FetchedPdf {
    /// Where the validated PDF was written.
    pub path: PathBuf,
    /// Extracted text (text layer or OCR).
    pub text: String,
}

/// Restricts a string to filesystem-safe characters for download names.
#[must_use]
pub fn sanitize_file_stem(value: &str) -> String {
    let mut stem: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    stem.truncate(120);
    if stem.is_empty() {
        stem.push_str("document");
    }
    stem
}

/// Downloads a candidate PDF URL, validates it, and extracts its text.
///
/// Shared by the repository and mirror stages. Appends one
/// [`DownloadAttempt`] describing the outcome. The downloaded file is
/// deleted when byte validation fails.
#[allow(clippy::too_many_arguments)]
pub(super) async fn download_and_extract(
    client: &HttpClient,
    url: &str,
    referer: Option<&str>,
    label: &str,
    download_dir: &Path,
    file_stem: &str,
    max_file_size: u64,
    ocr: Option<Arc<dyn OcrEngine>>,
    attempts: &mut Vec<DownloadAttempt>,
) -> Option<FetchedPdf> {
    let mut response = match client.get_bytes(url, referer).await {
        Ok(response) => response,
        Err(error) => {
            attempts.push(DownloadAttempt::failure(label, error.to_string()));
            return None;
        }
    };

    // An HTML body at a PDF URL may be a "still preparing" page; retry once.
    if looks_like_html(&response.content_type, &response.bytes) {
        debug!(url, "HTML at PDF URL, retrying once after delay");
        tokio::time::sleep(INTERSTITIAL_RETRY_DELAY).await;
        response = match client.get_bytes(url, referer).await {
            Ok(second) => second,
            Err(error) => {
                attempts.push(DownloadAttempt::failure(label, error.to_string()));
                return None;
            }
        };
        if looks_like_html(&response.content_type, &response.bytes) {
            attempts.push(DownloadAttempt::failure(
                label,
                format!("URL served HTML instead of PDF: {url}"),
            ));
            return None;
        }
    }

    let path = download_dir.join(format!("{}.pdf", sanitize_file_stem(file_stem)));
    if let Err(reason) = persist_validated_pdf(&path, &response.bytes, max_file_size).await {
        attempts.push(DownloadAttempt::failure(label, reason));
        return None;
    }

    match extract_pdf_text(&path, &response.bytes, MIN_TEXT_CHARS, ocr).await {
        Ok(text) => {
            attempts.push(DownloadAttempt::success(label));
            info!(url, path = %path.display(), chars = text.len(), "PDF acquired");
            Some(FetchedPdf { path, text })
        }
        Err(reason) => {
            attempts.push(DownloadAttempt::failure(label, reason));
            None
        }
    }
}

fn looks_like_html(content_type: &str, bytes: &[u8]) -> bool {
    content_type.contains("html") || !bytes.starts_with(b"%PDF")
}

/// Fetches article PDFs from an open-access repository.
#[derive(Clone)]
pub struct RepositoryFetcher {
    client: HttpClient,
    limiter: Arc<ServiceRateLimiter>,
    retry: RetryPolicy,
    render_base: String,
    article_base: String,
    renderer: Option<Arc<dyn PageRenderer>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    download_dir: PathBuf,
    max_file_size: u64,
}

impl std::fmt::Debug for RepositoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFetcher")
            .field("render_base", &self.render_base)
            .field("article_base", &self.article_base)
            .field("has_renderer", &self.renderer.is_some())
            .finish_non_exhaustive()
    }
}

impl RepositoryFetcher {
    /// Default direct-render endpoint base.
    pub const DEFAULT_RENDER_BASE: &'static str = "https://europepmc.org";

    /// Default article page base.
    pub const DEFAULT_ARTICLE_BASE: &'static str = "https://pmc.ncbi.nlm.nih.gov";

    /// Creates a fetcher against specific endpoint bases (test seam).
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<ServiceRateLimiter>,
        retry: RetryPolicy,
        render_base: impl Into<String>,
        article_base: impl Into<String>,
        renderer: Option<Arc<dyn PageRenderer>>,
        ocr: Option<Arc<dyn OcrEngine>>,
        download_dir: PathBuf,
        max_file_size: u64,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            render_base: render_base.into(),
            article_base: article_base.into(),
            renderer,
            ocr,
            download_dir,
            max_file_size,
        }
    }

    /// Attempts to fetch and extract the article PDF for a repository id.
    ///
    /// `advertised_urls` are PDF links carried in the work's metadata; they
    /// are tried before the repository endpoints. Returns `None` once every
    /// strategy is exhausted; per-strategy outcomes land in `attempts`.
    #[instrument(skip(self, advertised_urls, attempts))]
    pub async fn fetch(
        &self,
        pmcid: &str,
        advertised_urls: &[String],
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        let stem = format!("PMC{pmcid}");

        // Metadata-advertised links first: no scraping needed at all
        for url in advertised_urls {
            if let Some(fetched) = self.try_url(url, None, "oa-link", &stem, attempts).await {
                return Some(fetched);
            }
        }

        // Direct-render endpoints
        let render_base = self.render_base.trim_end_matches('/');
        let render_urls = [
            format!("{render_base}/backend/ptpmcrender.fcgi?accid=PMC{pmcid}&blobtype=pdf"),
            format!("{render_base}/articles/PMC{pmcid}?pdf=render"),
        ];
        for url in &render_urls {
            if let Some(fetched) = self
                .try_url(url, None, "direct-render", &stem, attempts)
                .await
            {
                return Some(fetched);
            }
        }

        // Article-page scraping with the layered strategy list
        let article_url = format!(
            "{}/articles/PMC{pmcid}/",
            self.article_base.trim_end_matches('/')
        );
        match self.fetch_article_page(&article_url).await {
            Ok(page) => {
                if let Some(fetched) = self
                    .scrape_and_fetch(&page.body, &page.final_url, &article_url, &stem, attempts)
                    .await
                {
                    return Some(fetched);
                }
            }
            Err(error) => {
                attempts.push(DownloadAttempt::failure("article-page", error.to_string()));
            }
        }

        // Direct URL probing
        let probe_urls = [
            format!(
                "{}/articles/PMC{pmcid}/pdf",
                self.article_base.trim_end_matches('/')
            ),
            format!(
                "{}/articles/PMC{pmcid}/pdf/PMC{pmcid}.pdf",
                self.article_base.trim_end_matches('/')
            ),
        ];
        for url in &probe_urls {
            if !self.probe_is_pdf(url).await {
                continue;
            }
            if let Some(fetched) = self
                .try_url(url, Some(&article_url), "url-probe", &stem, attempts)
                .await
            {
                return Some(fetched);
            }
        }

        // Headless rendering, when an engine was injected
        if let Some(renderer) = &self.renderer {
            match renderer.render(&article_url).await {
                Ok(html) => {
                    if let Some(fetched) = self
                        .scrape_and_fetch(&html, &article_url, &article_url, &stem, attempts)
                        .await
                    {
                        return Some(fetched);
                    }
                }
                Err(reason) => {
                    attempts.push(DownloadAttempt::failure("headless-render", reason));
                }
            }
        } else {
            debug!(pmcid, "no headless renderer configured, skipping");
        }

        warn!(pmcid, "every repository strategy failed");
        None
    }

    /// Tries only metadata-advertised PDF links, for works with no
    /// repository identifier.
    #[instrument(skip(self, urls, attempts))]
    pub async fn fetch_advertised(
        &self,
        urls: &[String],
        stem: &str,
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        for url in urls {
            if let Some(fetched) = self.try_url(url, None, "oa-link", stem, attempts).await {
                return Some(fetched);
            }
        }
        None
    }

    /// Fetches the article page with retry on transient statuses.
    async fn fetch_article_page(
        &self,
        url: &str,
    ) -> Result<crate::download::PageResponse, crate::download::FetchError> {
        with_retry(&self.retry, &self.limiter, REPOSITORY_SERVICE, || {
            self.client.get_text(url, None)
        })
        .await
    }

    /// Runs the strategy list over page HTML and downloads the first hit.
    async fn scrape_and_fetch(
        &self,
        html: &str,
        base_url: &str,
        referer: &str,
        stem: &str,
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        let Some((strategy, pdf_url)) = discover_pdf_link(html, base_url) else {
            attempts.push(DownloadAttempt::failure(
                "scrape",
                "no strategy located a PDF link".to_string(),
            ));
            return None;
        };
        debug!(strategy, pdf_url, "strategy located a PDF link");
        self.try_url(&pdf_url, Some(referer), strategy, stem, attempts)
            .await
    }

    /// HEAD-probes a candidate URL for a PDF content type.
    async fn probe_is_pdf(&self, url: &str) -> bool {
        match self.client.head_content_type(url).await {
            Ok((200, content_type)) => content_type.contains("pdf"),
            Ok(_) | Err(_) => false,
        }
    }

    async fn try_url(
        &self,
        url: &str,
        referer: Option<&str>,
        label: &str,
        stem: &str,
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        download_and_extract(
            &self.client,
            url,
            referer,
            label,
            &self.download_dir,
            stem,
            self.max_file_size,
            self.ocr.clone(),
            attempts,
        )
        .await
    }
}
