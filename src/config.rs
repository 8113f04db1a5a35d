//! Typed configuration for every pipeline component.
//!
//! Each component receives its own validated struct instead of reaching into
//! a shared configuration map: misconfiguration is rejected once, at load
//! time, rather than silently masked by lookup defaults. Settings are loaded
//! from a single TOML file and passed down by explicit construction.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Minimum accepted concurrency for the batch orchestrator.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum accepted concurrency for the batch orchestrator.
pub const MAX_CONCURRENCY: usize = 100;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    OutOfRange {
        /// Dotted field name.
        field: &'static str,
        /// Offending value rendered for the message.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

fn out_of_range(
    field: &'static str,
    value: impl ToString,
    expected: &'static str,
) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

/// Sliding-window rate limit for one named external service.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Service name used by callers of `ServiceRateLimiter::acquire`.
    pub service: String,
    /// Maximum admitted calls per window.
    pub max_calls: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitConfig {
    /// Creates a limit entry.
    #[must_use]
    pub fn new(service: impl Into<String>, max_calls: u32, window_secs: u64) -> Self {
        Self {
            service: service.into(),
            max_calls,
            window_secs,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(out_of_range(
                "rate_limits.service",
                &self.service,
                "a non-empty service name",
            ));
        }
        if self.max_calls == 0 {
            return Err(out_of_range("rate_limits.max_calls", self.max_calls, "1 or more"));
        }
        if self.window_secs == 0 {
            return Err(out_of_range("rate_limits.window_secs", self.window_secs, "1 or more"));
        }
        Ok(())
    }
}

/// Retry behavior for transient failures of external calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts including the initial one.
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap applied to computed backoff delays, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt (2.0 doubles each retry).
    pub backoff_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(out_of_range("retry.max_attempts", self.max_attempts, "1 or more"));
        }
        if self.backoff_factor < 1.0 {
            return Err(out_of_range(
                "retry.backoff_factor",
                self.backoff_factor,
                "1.0 or more",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(out_of_range(
                "retry.max_delay_ms",
                self.max_delay_ms,
                "at least base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Mirror pool used by the mirror-download acquisition stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorPoolConfig {
    /// Equivalent mirror base URLs, tried in health-aware order.
    pub mirrors: Vec<String>,
    /// Fixed delay between attempts against different mirrors, in milliseconds.
    pub attempt_delay_ms: u64,
}

impl Default for MirrorPoolConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            attempt_delay_ms: 3_000,
        }
    }
}

/// Character budget applied to prompt text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum prompt length in characters. `None` means unbounded.
    pub text_budget: Option<usize>,
}

/// Full-text acquisition settings shared by all acquisition stages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    /// Per-request timeout for page and API fetches, in seconds.
    pub timeout_secs: u64,
    /// Per-request timeout for PDF downloads, in seconds.
    pub download_timeout_secs: u64,
    /// Maximum accepted PDF size in bytes.
    pub max_file_size: u64,
    /// Directory where validated PDFs are written.
    pub download_dir: PathBuf,
    /// Directory for the structured-document cache. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Time-to-live for cached structured documents, in seconds.
    pub cache_ttl_secs: u64,
    /// User-Agent pool rotated across scraping requests.
    pub user_agents: Vec<String>,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            download_timeout_secs: 60,
            max_file_size: 50 * 1024 * 1024,
            download_dir: PathBuf::from("downloads"),
            cache_dir: None,
            cache_ttl_secs: 7 * 24 * 3600,
            user_agents: default_user_agents(),
        }
    }
}

impl AcquireConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3600).contains(&self.timeout_secs) {
            return Err(out_of_range("acquire.timeout_secs", self.timeout_secs, "1..=3600"));
        }
        if !(1..=3600).contains(&self.download_timeout_secs) {
            return Err(out_of_range(
                "acquire.download_timeout_secs",
                self.download_timeout_secs,
                "1..=3600",
            ));
        }
        if self.max_file_size < 1024 {
            return Err(out_of_range(
                "acquire.max_file_size",
                self.max_file_size,
                "at least 1024 bytes",
            ));
        }
        if self.user_agents.is_empty() {
            return Err(out_of_range(
                "acquire.user_agents",
                "[]",
                "at least one User-Agent string",
            ));
        }
        Ok(())
    }

    /// Returns the page-fetch timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the PDF-download timeout as a [`Duration`].
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Batch orchestration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of documents processed concurrently.
    pub concurrency: usize,
    /// Documents per batch chunk; a pause is applied between chunks.
    pub batch_size: usize,
    /// Pause between batch chunks, in seconds.
    pub batch_pause_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 10,
            batch_pause_secs: 5,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(out_of_range("pipeline.concurrency", self.concurrency, "1..=100"));
        }
        if self.batch_size == 0 {
            return Err(out_of_range("pipeline.batch_size", self.batch_size, "1 or more"));
        }
        Ok(())
    }
}

/// LLM extraction provider settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider label; doubles as the rate-limiter service name.
    pub provider: String,
    /// API base URL, e.g. `https://api.deepseek.com/v1`.
    pub api_base: String,
    /// Model identifier.
    pub model: String,
    /// API key. Empty means "taken from the environment by the caller".
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_base: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: String::new(),
            temperature: 0.1,
            max_tokens: 4_000,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(out_of_range("llm.api_base", &self.api_base, "a non-empty URL"));
        }
        if self.model.trim().is_empty() {
            return Err(out_of_range("llm.model", &self.model, "a non-empty model id"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(out_of_range("llm.temperature", self.temperature, "0.0..=2.0"));
        }
        Ok(())
    }
}

/// PubMed E-utilities settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubMedConfig {
    /// E-utilities base URL.
    pub base_url: String,
    /// Optional NCBI API key (raises the service rate limit).
    pub api_key: String,
    /// Records fetched per efetch request.
    pub fetch_batch_size: usize,
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            api_key: String::new(),
            fetch_batch_size: 100,
        }
    }
}

impl PubMedConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(out_of_range("pubmed.base_url", &self.base_url, "a non-empty URL"));
        }
        if !(1..=500).contains(&self.fetch_batch_size) {
            return Err(out_of_range(
                "pubmed.fetch_batch_size",
                self.fetch_batch_size,
                "1..=500",
            ));
        }
        Ok(())
    }
}

/// Complete settings tree loaded once at startup and passed down explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-service sliding-window limits.
    pub rate_limits: Vec<RateLimitConfig>,
    /// Retry/backoff behavior for transient failures.
    pub retry: RetryConfig,
    /// Mirror pool for the mirror-download stage.
    pub mirror_pool: MirrorPoolConfig,
    /// Prompt text budget.
    pub budget: BudgetConfig,
    /// Acquisition stage settings.
    pub acquire: AcquireConfig,
    /// Batch orchestration settings.
    pub pipeline: PipelineConfig,
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// PubMed metadata source settings.
    pub pubmed: PubMedConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rate_limits: default_rate_limits(),
            retry: RetryConfig::default(),
            mirror_pool: MirrorPoolConfig::default(),
            budget: BudgetConfig::default(),
            acquire: AcquireConfig::default(),
            pipeline: PipelineConfig::default(),
            llm: LlmConfig::default(),
            pubmed: PubMedConfig::default(),
        }
    }
}

impl PipelineSettings {
    /// Loads and validates settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails
    /// range validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every component section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::OutOfRange`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for limit in &self.rate_limits {
            limit.validate()?;
        }
        self.retry.validate()?;
        self.acquire.validate()?;
        self.pipeline.validate()?;
        self.llm.validate()?;
        self.pubmed.validate()?;
        Ok(())
    }
}

/// Default per-service limits: PubMed keyless (3/s) and the LLM provider.
fn default_rate_limits() -> Vec<RateLimitConfig> {
    vec![
        RateLimitConfig::new("pubmed", 3, 1),
        RateLimitConfig::new("deepseek", 200, 60),
    ]
}

/// Browser User-Agent pool rotated across scraping requests.
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64; rv:132.0) Gecko/20100101 Firefox/132.0",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
