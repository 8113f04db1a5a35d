//! Batch orchestration over the acquisition + extraction chain.
//!
//! Drives a collection of records concurrently through acquisition,
//! segmentation, budgeting, and LLM extraction. Concurrency is bounded by a
//! semaphore; records are processed in fixed-size chunks with a pause
//! between chunks so external rate limits are respected holistically, not
//! just per call. A per-item failure of any kind is converted into a result
//! record with a status tag and never aborts sibling work.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::acquire::{AcquisitionOutcome, FullTextAcquirer, TextSource};
use crate::analyze::{ExtractError, Extractor, FieldSchema};
use crate::config::{MAX_CONCURRENCY, MIN_CONCURRENCY, PipelineConfig};
use crate::extract::{allocate_budget, segment};
use crate::record::PaperRecord;

/// Error type for orchestrator construction.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Per-record outcome tag, from a fixed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Fields extracted and validated.
    Success,
    /// Acquisition ended with empty text; extraction skipped.
    NoContent,
    /// The extraction response was not parseable structured data.
    JsonError,
    /// The extraction service failed at the transport/provider level.
    ApiError,
    /// The record's task failed unexpectedly (panic or join failure).
    ProcessingError,
    /// The prepared prompt text was unusable (e.g. budgeted to nothing).
    Failed,
}

impl ExtractionStatus {
    /// Stable string label, as written into reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoContent => "no_content",
            Self::JsonError => "json_error",
            Self::ApiError => "api_error",
            Self::ProcessingError => "processing_error",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result for one record.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    /// Position of the record in the input collection.
    pub index: usize,
    /// The record's base metadata.
    pub record: PaperRecord,
    /// Outcome tag.
    pub status: ExtractionStatus,
    /// Optional human-readable error detail.
    pub error: Option<String>,
    /// Provenance of the text used for extraction.
    pub text_source: TextSource,
    /// Length of the prompt text handed to extraction.
    pub text_length: usize,
    /// Extracted fields; empty unless `status` is `Success`.
    pub fields: BTreeMap<String, String>,
}

impl DocumentResult {
    fn errored(
        index: usize,
        record: PaperRecord,
        status: ExtractionStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            index,
            record,
            status,
            error: Some(error.into()),
            text_source: TextSource::None,
            text_length: 0,
            fields: BTreeMap::new(),
        }
    }
}

/// Aggregate counts for a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records processed.
    pub total: usize,
    /// Records with extracted fields.
    pub success: usize,
    /// Records with no usable text.
    pub no_content: usize,
    /// Records whose extraction response did not parse.
    pub json_error: usize,
    /// Records whose extraction call failed.
    pub api_error: usize,
    /// Records whose task failed unexpectedly.
    pub processing_error: usize,
    /// Records with unusable prompt text.
    pub failed: usize,
    /// Wall-clock time for the whole run, in milliseconds.
    pub elapsed_ms: u128,
}

impl PipelineStats {
    /// Tallies statuses over settled results.
    #[must_use]
    pub fn from_results(results: &[DocumentResult], elapsed: Duration) -> Self {
        let mut stats = Self {
            total: results.len(),
            elapsed_ms: elapsed.as_millis(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                ExtractionStatus::Success => stats.success += 1,
                ExtractionStatus::NoContent => stats.no_content += 1,
                ExtractionStatus::JsonError => stats.json_error += 1,
                ExtractionStatus::ApiError => stats.api_error += 1,
                ExtractionStatus::ProcessingError => stats.processing_error += 1,
                ExtractionStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Acquisition seam consumed by the orchestrator.
///
/// [`FullTextAcquirer`] is the production implementation; tests substitute
/// deterministic fakes.
#[async_trait]
pub trait TextAcquirer: Send + Sync {
    /// Resolves full text for one record.
    async fn acquire(&self, record: &PaperRecord) -> AcquisitionOutcome;
}

#[async_trait]
impl TextAcquirer for FullTextAcquirer {
    async fn acquire(&self, record: &PaperRecord) -> AcquisitionOutcome {
        FullTextAcquirer::acquire(self, record).await
    }
}

/// Drives records through acquisition, budgeting, and extraction.
pub struct BatchOrchestrator {
    acquirer: Arc<dyn TextAcquirer>,
    extractor: Arc<dyn Extractor>,
    schema: Arc<FieldSchema>,
    language: String,
    text_budget: Option<usize>,
    concurrency: usize,
    batch_size: usize,
    batch_pause: Duration,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("text_budget", &self.text_budget)
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] when the configured
    /// concurrency is outside `1..=100`.
    pub fn new(
        acquirer: Arc<dyn TextAcquirer>,
        extractor: Arc<dyn Extractor>,
        schema: Arc<FieldSchema>,
        language: impl Into<String>,
        text_budget: Option<usize>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(PipelineError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        Ok(Self {
            acquirer,
            extractor,
            schema,
            language: language.into(),
            text_budget,
            concurrency: config.concurrency,
            batch_size: config.batch_size.max(1),
            batch_pause: Duration::from_secs(config.batch_pause_secs),
        })
    }

    /// Processes every record, returning settled per-record results.
    ///
    /// Results arrive in completion order; use [`restore_input_order`] when
    /// the caller needs them back in input order. The run always completes:
    /// per-item failures become status-tagged results, never errors.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn run(&self, records: Vec<PaperRecord>) -> (Vec<DocumentResult>, PipelineStats) {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut results: Vec<DocumentResult> = Vec::with_capacity(records.len());
        let total = records.len();

        info!(total, concurrency = self.concurrency, "starting batch run");

        let indexed: Vec<(usize, PaperRecord)> = records.into_iter().enumerate().collect();
        for chunk in indexed.chunks(self.batch_size) {
            let mut handles = Vec::with_capacity(chunk.len());
            for (index, record) in chunk {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closure is unreachable in practice
                        results.push(DocumentResult::errored(
                            *index,
                            record.clone(),
                            ExtractionStatus::ProcessingError,
                            "worker pool unavailable",
                        ));
                        continue;
                    }
                };

                let worker = Worker {
                    acquirer: Arc::clone(&self.acquirer),
                    extractor: Arc::clone(&self.extractor),
                    schema: Arc::clone(&self.schema),
                    language: self.language.clone(),
                    text_budget: self.text_budget,
                };
                let index = *index;
                let record = record.clone();
                let fallback_record = record.clone();

                handles.push((
                    index,
                    fallback_record,
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.process(index, record).await
                    }),
                ));
            }

            for (index, fallback_record, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(join_error) => {
                        warn!(index, error = %join_error, "record task failed");
                        results.push(DocumentResult::errored(
                            index,
                            fallback_record,
                            ExtractionStatus::ProcessingError,
                            join_error.to_string(),
                        ));
                    }
                }
            }

            if results.len() < total {
                debug!(
                    pause_secs = self.batch_pause.as_secs(),
                    "pausing between batch chunks"
                );
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        let stats = PipelineStats::from_results(&results, started.elapsed());
        info!(
            total = stats.total,
            success = stats.success,
            no_content = stats.no_content,
            json_error = stats.json_error,
            api_error = stats.api_error,
            processing_error = stats.processing_error,
            failed = stats.failed,
            elapsed_ms = stats.elapsed_ms,
            "batch run complete"
        );
        (results, stats)
    }
}

/// Per-record processing chain, run inside one worker task.
struct Worker {
    acquirer: Arc<dyn TextAcquirer>,
    extractor: Arc<dyn Extractor>,
    schema: Arc<FieldSchema>,
    language: String,
    text_budget: Option<usize>,
}

impl Worker {
    async fn process(&self, index: usize, record: PaperRecord) -> DocumentResult {
        let outcome = self.acquirer.acquire(&record).await;
        for attempt in &outcome.attempts {
            debug!(
                index,
                strategy = %attempt.mirror_or_strategy,
                success = attempt.success,
                error = attempt.error.as_deref().unwrap_or(""),
                "acquisition attempt"
            );
        }

        let acquired = outcome.text;
        if acquired.is_empty() {
            return DocumentResult {
                index,
                record,
                status: ExtractionStatus::NoContent,
                error: Some("no usable text from any acquisition stage".to_string()),
                text_source: TextSource::None,
                text_length: 0,
                fields: BTreeMap::new(),
            };
        }

        let text_source = acquired.source;
        let sectioned = segment(&acquired);
        let budgeted = allocate_budget(&sectioned, self.text_budget);
        if budgeted.text.trim().is_empty() {
            return DocumentResult {
                index,
                record,
                status: ExtractionStatus::Failed,
                error: Some("budgeted text is empty".to_string()),
                text_source,
                text_length: 0,
                fields: BTreeMap::new(),
            };
        }

        match self
            .extractor
            .extract(&budgeted.text, &self.schema, &self.language)
            .await
        {
            Ok(fields) => DocumentResult {
                index,
                record,
                status: ExtractionStatus::Success,
                error: None,
                text_source,
                text_length: budgeted.total_length,
                fields,
            },
            Err(error @ ExtractError::InvalidFormat { .. }) => {
                let mut result = DocumentResult::errored(
                    index,
                    record,
                    ExtractionStatus::JsonError,
                    error.to_string(),
                );
                result.text_source = text_source;
                result.text_length = budgeted.total_length;
                result
            }
            Err(error @ ExtractError::Api { .. }) => {
                let mut result = DocumentResult::errored(
                    index,
                    record,
                    ExtractionStatus::ApiError,
                    error.to_string(),
                );
                result.text_source = text_source;
                result.text_length = budgeted.total_length;
                result
            }
        }
    }
}

/// Sorts settled results back into input order.
pub fn restore_input_order(results: &mut [DocumentResult]) {
    results.sort_by_key(|r| r.index);
}
