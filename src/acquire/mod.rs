//! Full-text acquisition: the layered fallback state machine.
//!
//! For one document identifier, acquisition walks a strict stage order and
//! stops at the first success:
//!
//! 1. **Structured API** - machine-readable full text, when a PMID exists
//! 2. **PDF repository** - open-access PDF retrieval, when the DOI resolves
//!    to a repository identifier (multiple strategies per repository)
//! 3. **Mirror pool** - health-tracked mirror downloads, when a DOI exists
//! 4. **Abstract fallback** - title + abstract, always available
//!
//! No stage failure is fatal: every document ends with *some* usable text
//! (possibly just title+abstract) and a provenance tag recording how that
//! text was obtained. Only a document with no structured text, no PDF, no
//! mirror success, and no abstract resolves to an empty-text result, which
//! is reported rather than raised.

pub mod bioc;
pub mod cache;
pub mod mirrors;
pub mod oa;
pub mod repository;
pub mod strategies;

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub use bioc::{BiocClient, BiocCollection, BiocDocument, BiocPassage};
pub use cache::DocumentCache;
pub use mirrors::MirrorFetcher;
pub use oa::{OaResolver, OpenAccessStatus, extract_pmcid};
pub use repository::{FetchedPdf, RepositoryFetcher, sanitize_file_stem};
pub use strategies::{NamedStrategy, PageRenderer, discover_pdf_link, find_embedded_pdf};

use crate::config::{AcquireConfig, MirrorPoolConfig};
use crate::download::{HttpClient, RetryPolicy, ServiceRateLimiter};
use crate::extract::OcrEngine;
use crate::mirror::MirrorHealthTracker;
use crate::record::{DocumentIdentifier, PaperRecord};

/// Provenance tag: which acquisition stage produced a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Structured full-text API.
    StructuredApi,
    /// Open-access PDF repository.
    PdfRepository,
    /// Mirror pool download.
    MirrorDownload,
    /// Title + abstract degradation.
    AbstractFallback,
    /// Nothing usable was found; text is empty.
    None,
}

impl TextSource {
    /// Stable string label, as written into reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuredApi => "structured_api",
            Self::PdfRepository => "pdf_repository",
            Self::MirrorDownload => "mirror_download",
            Self::AbstractFallback => "abstract_fallback",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for TextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of full-text acquisition for one identifier.
///
/// Immutable once created; re-fetching produces a new value. Invariant:
/// empty `raw_text` always carries [`TextSource::None`].
#[derive(Debug, Clone)]
pub struct AcquiredText {
    /// Identifier this text belongs to.
    pub identifier: DocumentIdentifier,
    /// The acquired text; empty only when `source` is [`TextSource::None`].
    pub raw_text: String,
    /// Which stage produced the text.
    pub source: TextSource,
    /// Ordered (`section_tag`, text) pairs when the source was structured;
    /// empty for unstructured sources.
    pub section_map: Vec<(String, String)>,
    /// When acquisition finished.
    pub fetched_at: SystemTime,
}

impl AcquiredText {
    /// Creates an acquisition result, normalizing the empty-text invariant.
    #[must_use]
    pub fn new(
        identifier: DocumentIdentifier,
        raw_text: String,
        source: TextSource,
        section_map: Vec<(String, String)>,
    ) -> Self {
        if raw_text.is_empty() {
            return Self::none(identifier);
        }
        Self {
            identifier,
            raw_text,
            source,
            section_map,
            fetched_at: SystemTime::now(),
        }
    }

    /// Creates the empty low-information result.
    #[must_use]
    pub fn none(identifier: DocumentIdentifier) -> Self {
        Self {
            identifier,
            raw_text: String::new(),
            source: TextSource::None,
            section_map: Vec::new(),
            fetched_at: SystemTime::now(),
        }
    }

    /// True when downstream extraction should be skipped entirely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw_text.is_empty()
    }
}

/// Ephemeral record of one acquisition try, kept for logging and statistics.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    /// Mirror URL or strategy label that was tried.
    pub mirror_or_strategy: String,
    /// Whether the try produced usable output.
    pub success: bool,
    /// Failure detail, when unsuccessful.
    pub error: Option<String>,
    /// When the try finished.
    pub timestamp: SystemTime,
}

impl DownloadAttempt {
    /// Records a successful try.
    #[must_use]
    pub fn success(label: &str) -> Self {
        Self {
            mirror_or_strategy: label.to_string(),
            success: true,
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Records a failed try.
    #[must_use]
    pub fn failure(label: &str, error: String) -> Self {
        Self {
            mirror_or_strategy: label.to_string(),
            success: false,
            error: Some(error),
            timestamp: SystemTime::now(),
        }
    }
}

/// Acquisition result plus the per-try log that produced it.
#[derive(Debug)]
pub struct AcquisitionOutcome {
    /// The acquired text with its provenance.
    pub text: AcquiredText,
    /// Every try made while resolving this identifier, in order.
    pub attempts: Vec<DownloadAttempt>,
}

/// External endpoint bases, overridable for tests.
#[derive(Debug, Clone)]
pub struct AcquirerEndpoints {
    /// Structured full-text API base.
    pub bioc_base: String,
    /// Crossref API base.
    pub crossref_base: String,
    /// Identifier-converter API base.
    pub idconv_base: String,
    /// Repository direct-render base.
    pub render_base: String,
    /// Repository article-page base.
    pub article_base: String,
}

impl Default for AcquirerEndpoints {
    fn default() -> Self {
        Self {
            bioc_base: BiocClient::DEFAULT_BASE_URL.to_string(),
            crossref_base: OaResolver::DEFAULT_CROSSREF_BASE.to_string(),
            idconv_base: OaResolver::DEFAULT_IDCONV_BASE.to_string(),
            render_base: RepositoryFetcher::DEFAULT_RENDER_BASE.to_string(),
            article_base: RepositoryFetcher::DEFAULT_ARTICLE_BASE.to_string(),
        }
    }
}

impl AcquirerEndpoints {
    /// Points every endpoint at one base URL; convenient for mock servers.
    #[must_use]
    pub fn all_at(base: &str) -> Self {
        Self {
            bioc_base: format!("{base}/bioc"),
            crossref_base: format!("{base}/crossref"),
            idconv_base: format!("{base}/idconv"),
            render_base: format!("{base}/render"),
            article_base: format!("{base}/repo"),
        }
    }
}

/// Orchestrates the ordered fallback chain for one identifier at a time.
#[derive(Debug, Clone)]
pub struct FullTextAcquirer {
    bioc: BiocClient,
    oa: OaResolver,
    repository: RepositoryFetcher,
    mirrors: MirrorFetcher,
}

impl FullTextAcquirer {
    /// Wires the acquirer from its shared components and configuration.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        client: HttpClient,
        limiter: Arc<ServiceRateLimiter>,
        retry: RetryPolicy,
        tracker: Arc<MirrorHealthTracker>,
        acquire_config: &AcquireConfig,
        mirror_config: &MirrorPoolConfig,
        endpoints: AcquirerEndpoints,
        renderer: Option<Arc<dyn PageRenderer>>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        let document_cache = acquire_config.cache_dir.as_ref().map(|dir| {
            DocumentCache::new(
                dir.clone(),
                std::time::Duration::from_secs(acquire_config.cache_ttl_secs),
            )
        });

        let bioc = BiocClient::new(
            client.clone(),
            Arc::clone(&limiter),
            retry.clone(),
            endpoints.bioc_base,
            document_cache,
        );
        let oa = OaResolver::new(
            client.clone(),
            Arc::clone(&limiter),
            retry.clone(),
            endpoints.crossref_base,
            endpoints.idconv_base,
        );
        let repository = RepositoryFetcher::new(
            client.clone(),
            limiter,
            retry,
            endpoints.render_base,
            endpoints.article_base,
            renderer,
            ocr.clone(),
            acquire_config.download_dir.clone(),
            acquire_config.max_file_size,
        );
        let mirrors = MirrorFetcher::new(
            client,
            tracker,
            std::time::Duration::from_millis(mirror_config.attempt_delay_ms),
            ocr,
            acquire_config.download_dir.clone(),
            acquire_config.max_file_size,
        );

        Self {
            bioc,
            oa,
            repository,
            mirrors,
        }
    }

    /// Resolves full text for one record through the ordered fallback chain.
    ///
    /// Stages run strictly in order; each is attempted only when every prior
    /// stage failed or was inapplicable.
    #[instrument(skip(self, record), fields(id = %record.identifier.display_key()))]
    pub async fn acquire(&self, record: &PaperRecord) -> AcquisitionOutcome {
        let mut attempts: Vec<DownloadAttempt> = Vec::new();
        let identifier = record.identifier.clone();

        // Stage 1: structured full text, when a PMID exists
        if let Some(pmid) = &identifier.pmid {
            match self.bioc.fetch_document(pmid).await {
                Ok(Some(document)) => {
                    let section_map = document.tagged_passages();
                    let meta = document.meta_header();
                    let body = document.render_text();
                    let raw_text = if meta.is_empty() {
                        body
                    } else {
                        format!("{meta}\n\n{body}")
                    };
                    attempts.push(DownloadAttempt::success("structured-api"));
                    info!(pmid, chars = raw_text.len(), "structured full text acquired");
                    return AcquisitionOutcome {
                        text: AcquiredText::new(
                            identifier,
                            raw_text,
                            TextSource::StructuredApi,
                            section_map,
                        ),
                        attempts,
                    };
                }
                Ok(None) => {
                    attempts.push(DownloadAttempt::failure(
                        "structured-api",
                        "no full text available".to_string(),
                    ));
                }
                Err(error) => {
                    attempts.push(DownloadAttempt::failure("structured-api", error.to_string()));
                    warn!(pmid, %error, "structured stage failed");
                }
            }
        } else {
            debug!("no PMID, structured stage inapplicable");
        }

        // Stage 2: open-access PDF repositories, when the DOI resolves
        if let Some(doi) = &identifier.doi {
            let status = self.oa.resolve(doi).await;
            if let Some(pmcid) = &status.pmcid {
                if let Some(fetched) = self
                    .repository
                    .fetch(pmcid, &status.pdf_urls, &mut attempts)
                    .await
                {
                    return AcquisitionOutcome {
                        text: AcquiredText::new(
                            identifier,
                            fetched.text,
                            TextSource::PdfRepository,
                            Vec::new(),
                        ),
                        attempts,
                    };
                }
            } else if !status.pdf_urls.is_empty() {
                if let Some(fetched) = self
                    .repository
                    .fetch_advertised(&status.pdf_urls, &sanitize_file_stem(doi), &mut attempts)
                    .await
                {
                    return AcquisitionOutcome {
                        text: AcquiredText::new(
                            identifier,
                            fetched.text,
                            TextSource::PdfRepository,
                            Vec::new(),
                        ),
                        attempts,
                    };
                }
            } else {
                debug!(doi, "no open-access indicator, repository stage inapplicable");
            }

            // Stage 3: mirror pool, still keyed by the DOI
            if let Some(fetched) = self.mirrors.fetch(doi, &mut attempts).await {
                return AcquisitionOutcome {
                    text: AcquiredText::new(
                        identifier,
                        fetched.text,
                        TextSource::MirrorDownload,
                        Vec::new(),
                    ),
                    attempts,
                };
            }
        } else {
            debug!("no DOI, repository and mirror stages inapplicable");
        }

        // Stage 4: abstract fallback, the guaranteed last resort
        if record.has_abstract() {
            let raw_text = format!(
                "Title: {}\n\nAbstract: {}",
                identifier.title,
                record.abstract_text.trim()
            );
            attempts.push(DownloadAttempt::success("abstract-fallback"));
            info!(chars = raw_text.len(), "degraded to abstract-only text");
            return AcquisitionOutcome {
                text: AcquiredText::new(
                    identifier,
                    raw_text,
                    TextSource::AbstractFallback,
                    Vec::new(),
                ),
                attempts,
            };
        }

        warn!("no usable text from any stage");
        attempts.push(DownloadAttempt::failure(
            "abstract-fallback",
            "record has no abstract".to_string(),
        ));
        AcquisitionOutcome {
            text: AcquiredText::none(identifier),
            attempts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id() -> DocumentIdentifier {
        DocumentIdentifier::new(
            Some("12345678".to_string()),
            Some("10.1/xyz".to_string()),
            "A Paper",
        )
        .unwrap()
    }

    #[test]
    fn test_empty_text_normalizes_to_none_source() {
        let acquired = AcquiredText::new(
            id(),
            String::new(),
            TextSource::StructuredApi,
            vec![("ABSTRACT".to_string(), "x".to_string())],
        );
        assert_eq!(acquired.source, TextSource::None);
        assert!(acquired.section_map.is_empty());
        assert!(acquired.is_empty());
    }

    #[test]
    fn test_nonempty_text_keeps_source() {
        let acquired = AcquiredText::new(
            id(),
            "body".to_string(),
            TextSource::MirrorDownload,
            Vec::new(),
        );
        assert_eq!(acquired.source, TextSource::MirrorDownload);
        assert!(!acquired.is_empty());
    }

    #[test]
    fn test_source_labels_are_stable() {
        assert_eq!(TextSource::StructuredApi.as_str(), "structured_api");
        assert_eq!(TextSource::PdfRepository.as_str(), "pdf_repository");
        assert_eq!(TextSource::MirrorDownload.as_str(), "mirror_download");
        assert_eq!(TextSource::AbstractFallback.as_str(), "abstract_fallback");
        assert_eq!(TextSource::None.as_str(), "none");
    }

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&TextSource::AbstractFallback).unwrap();
        assert_eq!(json, "\"abstract_fallback\"");
    }

    #[test]
    fn test_attempt_constructors() {
        let ok = DownloadAttempt::success("direct-render");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let bad = DownloadAttempt::failure("mirror-a", "HTTP 503".to_string());
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_endpoints_all_at_prefixes_base() {
        let endpoints = AcquirerEndpoints::all_at("http://127.0.0.1:9000");
        assert_eq!(endpoints.bioc_base, "http://127.0.0.1:9000/bioc");
        assert_eq!(endpoints.article_base, "http://127.0.0.1:9000/repo");
    }
}
