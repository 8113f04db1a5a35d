//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Mine PubMed literature into structured, LLM-extracted reports.
///
/// Pubminer searches the literature, acquires full text through a layered
/// fallback chain (structured full text, open-access PDFs, mirror pools,
/// abstract-only degradation), and extracts schema-defined fields with an
/// LLM into a CSV report.
#[derive(Parser, Debug)]
#[command(name = "pubminer")]
#[command(author, version, about)]
pub struct Args {
    /// PubMed search query (e.g. "aging biomarkers AND 2024[dp]")
    #[arg(long, conflicts_with = "pmids")]
    pub query: Option<String>,

    /// File containing PMIDs to process, one per line
    #[arg(long, value_name = "FILE")]
    pub pmids: Option<PathBuf>,

    /// Maximum number of search results to process (1-10000)
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub max_results: u32,

    /// Extraction schema template (JSON); a built-in schema is used if omitted
    #[arg(long, value_name = "FILE")]
    pub schema: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output CSV path
    #[arg(short = 'o', long, default_value = "results.csv")]
    pub output: PathBuf,

    /// Output language for extracted values
    #[arg(long, default_value = "English")]
    pub language: String,

    /// Concurrent documents in flight (1-100); overrides the config file
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum attempts for transient failures (1-10); overrides the config file
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Prompt text budget in characters (0 = unbounded); overrides the config file
    #[arg(long)]
    pub text_budget: Option<u64>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
