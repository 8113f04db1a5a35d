//! PDF retrieval through a pool of equivalent mirrors.
//!
//! When neither the structured API nor the open-access repositories produce
//! full text, the DOI is tried against a mirror pool. Candidates come from
//! the health tracker in failure-weighted, randomized order; each attempt
//! fetches the mirror's landing page, locates the served PDF with the same
//! layered link heuristics as the repository stage, downloads and validates
//! it, and reports the outcome back to the tracker. A fixed delay separates
//! attempts so a struggling pool is not hammered.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::DownloadAttempt;
use super::repository::{FetchedPdf, download_and_extract, sanitize_file_stem};
use super::strategies::find_embedded_pdf;
use crate::download::HttpClient;
use crate::extract::OcrEngine;
use crate::mirror::MirrorHealthTracker;

/// Fetches PDFs from mirror pools with health-aware ordering.
#[derive(Clone)]
pub struct MirrorFetcher {
    client: HttpClient,
    tracker: Arc<MirrorHealthTracker>,
    attempt_delay: Duration,
    ocr: Option<Arc<dyn OcrEngine>>,
    download_dir: PathBuf,
    max_file_size: u64,
}

impl std::fmt::Debug for MirrorFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorFetcher")
            .field("attempt_delay", &self.attempt_delay)
            .finish_non_exhaustive()
    }
}

impl MirrorFetcher {
    /// Creates a fetcher over the given pool tracker.
    #[must_use]
    pub fn new(
        client: HttpClient,
        tracker: Arc<MirrorHealthTracker>,
        attempt_delay: Duration,
        ocr: Option<Arc<dyn OcrEngine>>,
        download_dir: PathBuf,
        max_file_size: u64,
    ) -> Self {
        Self {
            client,
            tracker,
            attempt_delay,
            ocr,
            download_dir,
            max_file_size,
        }
    }

    /// Attempts to fetch the document for a DOI from the mirror pool.
    ///
    /// Tries each candidate in tracker order, reporting success or failure
    /// after every attempt; returns `None` when the pool is exhausted.
    #[instrument(skip(self, attempts))]
    pub async fn fetch(
        &self,
        doi: &str,
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        let candidates = self.tracker.candidates(&HashSet::new());
        if candidates.is_empty() {
            warn!(doi, "no active mirrors available");
            attempts.push(DownloadAttempt::failure(
                "mirror-pool",
                "no active mirrors available".to_string(),
            ));
            return None;
        }

        let total = candidates.len();
        for (index, mirror) in candidates.into_iter().enumerate() {
            debug!(doi, mirror, "trying mirror");
            match self.fetch_from_mirror(&mirror, doi, attempts).await {
                Some(fetched) => {
                    self.tracker.report(&mirror, true);
                    info!(doi, mirror, "mirror download succeeded");
                    return Some(fetched);
                }
                None => {
                    self.tracker.report(&mirror, false);
                }
            }

            if index + 1 < total {
                tokio::time::sleep(self.attempt_delay).await;
            }
        }

        warn!(doi, "all mirror candidates exhausted");
        None
    }

    /// One attempt against one mirror: landing page, link discovery, download.
    async fn fetch_from_mirror(
        &self,
        mirror: &str,
        doi: &str,
        attempts: &mut Vec<DownloadAttempt>,
    ) -> Option<FetchedPdf> {
        let landing_url = format!(
            "{}/{}",
            mirror.trim_end_matches('/'),
            urlencoding::encode(doi)
        );

        let page = match self.client.get_text(&landing_url, None).await {
            Ok(page) => page,
            Err(error) => {
                attempts.push(DownloadAttempt::failure(mirror, error.to_string()));
                return None;
            }
        };

        let Some(pdf_url) = find_embedded_pdf(&page.body, &page.final_url) else {
            attempts.push(DownloadAttempt::failure(
                mirror,
                "no PDF link on landing page".to_string(),
            ));
            return None;
        };
        debug!(mirror, pdf_url, "landing page exposed a PDF link");

        download_and_extract(
            &self.client,
            &pdf_url,
            Some(&landing_url),
            mirror,
            &self.download_dir,
            &sanitize_file_stem(doi),
            self.max_file_size,
            self.ocr.clone(),
            attempts,
        )
        .await
    }
}
