//! CLI entry point for the pubminer tool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pubminer_core::acquire::{AcquirerEndpoints, FullTextAcquirer};
use pubminer_core::analyze::{FieldSchema, LlmExtractor};
use pubminer_core::config::PipelineSettings;
use pubminer_core::download::{HttpClient, RetryPolicy, ServiceRateLimiter};
use pubminer_core::mirror::MirrorHealthTracker;
use pubminer_core::pipeline::{BatchOrchestrator, restore_input_order};
use pubminer_core::pubmed::{MetadataSource, PubMedClient};
use pubminer_core::record::PaperRecord;
use pubminer_core::report::write_csv_report;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Pubminer starting");

    let mut settings = match &args.config {
        Some(path) => PipelineSettings::load(path)?,
        None => PipelineSettings::default(),
    };
    apply_overrides(&mut settings, &args);
    settings.validate()?;

    let schema = Arc::new(load_schema(args.schema.as_deref())?);
    info!(schema = %schema.name, fields = schema.fields.len(), "extraction schema loaded");

    // Shared components, constructed once and passed down explicitly
    let limiter = Arc::new(ServiceRateLimiter::new(&settings.rate_limits));
    let retry = RetryPolicy::from_config(&settings.retry);
    let client = HttpClient::new(
        settings.acquire.timeout(),
        settings.acquire.user_agents.clone(),
    );
    let tracker = Arc::new(MirrorHealthTracker::new(&settings.mirror_pool.mirrors));

    let metadata = PubMedClient::new(
        client.clone(),
        Arc::clone(&limiter),
        retry.clone(),
        settings.pubmed.clone(),
    );

    let records = load_records(&metadata, &args).await?;
    if records.is_empty() {
        info!("Nothing to process");
        return Ok(());
    }
    info!(records = records.len(), "bibliographic records fetched");

    let acquirer = Arc::new(FullTextAcquirer::new(
        client,
        Arc::clone(&limiter),
        retry.clone(),
        Arc::clone(&tracker),
        &settings.acquire,
        &settings.mirror_pool,
        AcquirerEndpoints::default(),
        None,
        None,
    ));

    let mut llm_config = settings.llm.clone();
    if llm_config.api_key.is_empty()
        && let Ok(key) = std::env::var("PUBMINER_API_KEY")
    {
        llm_config.api_key = key;
    }
    if llm_config.api_key.is_empty() {
        warn!("no LLM API key configured; extraction calls may be rejected");
    }
    let extractor = Arc::new(LlmExtractor::new(llm_config, Arc::clone(&limiter), retry));

    let orchestrator = BatchOrchestrator::new(
        acquirer,
        extractor,
        Arc::clone(&schema),
        args.language.clone(),
        settings.budget.text_budget,
        &settings.pipeline,
    )?;

    let (mut results, stats) = orchestrator.run(records).await;
    restore_input_order(&mut results);

    write_csv_report(&args.output, &results, &schema)
        .with_context(|| format!("writing report to {}", args.output.display()))?;

    let mirror_stats = tracker.stats();
    info!(
        total = stats.total,
        success = stats.success,
        no_content = stats.no_content,
        json_error = stats.json_error,
        api_error = stats.api_error,
        processing_error = stats.processing_error,
        failed = stats.failed,
        elapsed_ms = stats.elapsed_ms,
        active_mirrors = mirror_stats.active,
        output = %args.output.display(),
        "Run complete"
    );

    Ok(())
}

/// Applies CLI overrides onto loaded settings.
fn apply_overrides(settings: &mut PipelineSettings, args: &Args) {
    if let Some(concurrency) = args.concurrency {
        settings.pipeline.concurrency = usize::from(concurrency);
    }
    if let Some(max_retries) = args.max_retries {
        settings.retry.max_attempts = u32::from(max_retries);
    }
    if let Some(budget) = args.text_budget {
        settings.budget.text_budget = if budget == 0 {
            None
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Some(budget as usize)
        };
    }
}

/// Loads the extraction schema from a template file or the built-in default.
fn load_schema(path: Option<&std::path::Path>) -> Result<FieldSchema> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading schema template {}", path.display()))?;
            FieldSchema::from_json(&raw)
                .with_context(|| format!("parsing schema template {}", path.display()))
        }
        None => Ok(FieldSchema::standard()),
    }
}

/// Resolves input records from a query or a PMID file.
async fn load_records(metadata: &PubMedClient, args: &Args) -> Result<Vec<PaperRecord>> {
    if let Some(query) = &args.query {
        let max_results = args.max_results as usize;
        let mut ids: Vec<String> = Vec::new();

        // Page through search results up to the requested cap
        loop {
            let remaining = max_results - ids.len();
            if remaining == 0 {
                break;
            }
            let page = metadata
                .search(query, ids.len(), remaining.min(200))
                .await
                .context("searching the metadata source")?;
            if page.ids.is_empty() {
                break;
            }
            ids.extend(page.ids);
            if ids.len() >= page.count {
                break;
            }
        }

        info!(query, ids = ids.len(), "search complete");
        return metadata
            .fetch_records(&ids)
            .await
            .context("fetching bibliographic records");
    }

    if let Some(path) = &args.pmids {
        let ids = read_pmid_file(path)?;
        info!(path = %path.display(), ids = ids.len(), "PMID list loaded");
        return metadata
            .fetch_records(&ids)
            .await
            .context("fetching bibliographic records");
    }

    bail!("either --query or --pmids is required");
}

/// Reads a PMID list file: one id per line, blanks and # comments skipped.
fn read_pmid_file(path: &PathBuf) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading PMID file {}", path.display()))?;
    let ids: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        bail!("PMID file {} contains no ids", path.display());
    }
    Ok(ids)
}
