//! Structured field extraction with a large-language-model.
//!
//! The pipeline talks to the extraction service only through the
//! [`Extractor`] trait: hand it prompt-ready text plus a [`FieldSchema`] and
//! get back a field-to-value map. The provided [`LlmExtractor`] speaks the
//! OpenAI-compatible chat-completions protocol; responses are cleaned of
//! markdown fences and surrounding prose before parsing, validated against
//! the schema, and never allowed to introduce fields the schema does not
//! define.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::LlmConfig;
use crate::download::{FetchError, RetryPolicy, ServiceRateLimiter, with_retry};

/// Placeholder for fields the text does not state.
pub const NOT_MENTIONED: &str = "Not mentioned";

/// Cap on a single extracted value's length.
const MAX_VALUE_LENGTH: usize = 1_000;

/// One field the extraction service must fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Stable key used in responses and report columns.
    pub key: String,
    /// Human-readable field name.
    pub name: String,
    /// What to extract, phrased for the model.
    #[serde(default)]
    pub description: String,
    /// Whether a missing value should be flagged.
    #[serde(default)]
    pub required: bool,
}

/// An ordered extraction schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Schema name, for logging and report metadata.
    pub name: String,
    /// Fields in column order.
    pub fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Parses a schema from its JSON template text.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidFormat`] when the template does not
    /// parse or defines no fields.
    pub fn from_json(raw: &str) -> Result<Self, ExtractError> {
        let schema: Self = serde_json::from_str(raw).map_err(|e| ExtractError::InvalidFormat {
            message: format!("schema template: {e}"),
        })?;
        if schema.fields.is_empty() {
            return Err(ExtractError::InvalidFormat {
                message: "schema template defines no fields".to_string(),
            });
        }
        Ok(schema)
    }

    /// Field keys in column order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.key.as_str()).collect()
    }

    /// The built-in general-purpose schema used when no template is given.
    #[must_use]
    pub fn standard() -> Self {
        let field = |key: &str, name: &str, description: &str, required: bool| FieldSpec {
            key: key.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            required,
        };
        Self {
            name: "standard".to_string(),
            fields: vec![
                field(
                    "study_type",
                    "Study Type",
                    "The study design (e.g. RCT, cohort, review, in vitro)",
                    true,
                ),
                field(
                    "population",
                    "Study Population",
                    "Species, cohort, or cell model studied",
                    false,
                ),
                field(
                    "sample_size",
                    "Sample Size",
                    "Number of subjects or samples",
                    false,
                ),
                field(
                    "methods_summary",
                    "Methods Summary",
                    "One-sentence summary of the methodology",
                    false,
                ),
                field(
                    "key_findings",
                    "Key Findings",
                    "The main results in one or two sentences",
                    true,
                ),
                field(
                    "limitations",
                    "Limitations",
                    "Limitations acknowledged by the authors",
                    false,
                ),
            ],
        }
    }
}

/// Errors from the extraction service.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Transport or provider failure.
    #[error("extraction API error: {message}")]
    Api {
        /// Failure detail.
        message: String,
    },

    /// The response was not valid structured data matching the schema.
    #[error("extraction response not parseable: {message}")]
    InvalidFormat {
        /// Parse failure detail.
        message: String,
    },
}

/// The extraction service seam.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extracts schema fields from prompt-ready text.
    ///
    /// Implementations must not fabricate fields outside the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidFormat`] for unparseable responses and
    /// [`ExtractError::Api`] for transport/provider failures.
    async fn extract(
        &self,
        text: &str,
        schema: &FieldSchema,
        language: &str,
    ) -> Result<BTreeMap<String, String>, ExtractError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// OpenAI-compatible chat-completions extractor.
pub struct LlmExtractor {
    http: reqwest::Client,
    config: LlmConfig,
    limiter: Arc<ServiceRateLimiter>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for LlmExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmExtractor")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl LlmExtractor {
    /// Creates an extractor from provider configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied timeouts,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(config: LlmConfig, limiter: Arc<ServiceRateLimiter>, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            http,
            config,
            limiter,
            retry,
        }
    }

    fn system_prompt(schema: &FieldSchema, language: &str) -> String {
        let mut prompt = String::from(
            "You are an expert at extracting structured information from \
             scientific literature.\n\
             Extract the following fields from the provided text:\n",
        );
        for field in &schema.fields {
            prompt.push_str(&format!(
                "- \"{}\": {} ({})\n",
                field.key,
                field.description,
                if field.required { "required" } else { "optional" }
            ));
        }
        prompt.push_str(&format!(
            "\nRespond with a single JSON object whose keys are exactly the \
             field keys above. Write every value in {language}. Use \
             \"{NOT_MENTIONED}\" when the text does not state a field. Do not \
             invent fields that are not listed."
        ));
        prompt
    }

    fn user_prompt(text: &str) -> String {
        format!("Text to analyze:\n---\n{text}\n---\n\nReturn the JSON object now.")
    }

    async fn call_api(&self, messages: Vec<ChatMessage>) -> Result<String, FetchError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.http.post(&url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(FetchError::http_status_with_retry_after(
                &url,
                status.as_u16(),
                retry_after,
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| FetchError::bad_body(&url, e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| FetchError::bad_body(&url, "response carried no choices".to_string()))
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    #[instrument(skip(self, text, schema), fields(chars = text.len(), schema = %schema.name))]
    async fn extract(
        &self,
        text: &str,
        schema: &FieldSchema,
        language: &str,
    ) -> Result<BTreeMap<String, String>, ExtractError> {
        let system = Self::system_prompt(schema, language);
        let user = Self::user_prompt(text);

        let content = with_retry(&self.retry, &self.limiter, &self.config.provider, || {
            self.call_api(vec![
                ChatMessage {
                    role: "system",
                    content: system.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: user.clone(),
                },
            ])
        })
        .await
        .map_err(|e| ExtractError::Api {
            message: e.to_string(),
        })?;

        let cleaned = clean_json_response(&content);
        let parsed: Value =
            serde_json::from_str(&cleaned).map_err(|e| ExtractError::InvalidFormat {
                message: e.to_string(),
            })?;

        Ok(validate_against_schema(&parsed, schema))
    }
}

/// Strips markdown fences and surrounding prose from a model response,
/// leaving the JSON object.
#[must_use]
pub fn clean_json_response(response: &str) -> String {
    let stripped = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    // Keep the outermost object when the model added prose around it
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}'))
        && start < end
    {
        return stripped[start..=end].to_string();
    }
    stripped.to_string()
}

/// Validates a parsed response against the schema.
///
/// Fields outside the schema are dropped; empty values are normalized to
/// [`NOT_MENTIONED`] (with a warning for required fields); oversized values
/// are truncated.
#[must_use]
pub fn validate_against_schema(parsed: &Value, schema: &FieldSchema) -> BTreeMap<String, String> {
    let mut validated = BTreeMap::new();
    for field in &schema.fields {
        let raw = parsed.get(&field.key);
        let mut value = match raw {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        if value.is_empty() || matches!(value.as_str(), "N/A" | "NA" | "null" | "None") {
            if field.required {
                warn!(field = %field.key, "required field not extracted");
            }
            value = NOT_MENTIONED.to_string();
        }

        if value.len() > MAX_VALUE_LENGTH {
            debug!(field = %field.key, len = value.len(), "truncating oversized value");
            let mut end = MAX_VALUE_LENGTH - 3;
            while end > 0 && !value.is_char_boundary(end) {
                end -= 1;
            }
            value.truncate(end);
            value.push_str("...");
        }

        validated.insert(field.key.clone(), value);
    }
    validated
}
