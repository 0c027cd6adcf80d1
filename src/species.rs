//! LLM-based species observation extraction.
//!
//! One request per document, sequential. The paper text is truncated to the
//! configured character budget; if the service still rejects the input as too
//! long, the budget is halved and the request resubmitted a bounded number of
//! times. Model output that is not a usable JSON array yields zero rows.

use crate::document::{Document, ObservationRow};
use crate::error::{error_from_response, OptionExt, RefSpeciesError, Result};
use crate::prompts::species_extraction::{build_user_prompt, SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anthropic Messages API version header
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Halving the input never goes below this many characters
const MIN_INPUT_CHARS: usize = 2_000;

/// Resubmissions after an over-long rejection
const MAX_SHRINKS: u32 = 3;

/// Default abundance when the model reports none
pub const NOT_SPECIFIED: &str = "not specified";

/// Default location when the model reports none
pub const UNSPECIFIED: &str = "UNSPECIFIED";

/// Wire format of the language-model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LlmProvider {
    /// Anthropic Messages API
    #[default]
    Anthropic,
    /// OpenAI-compatible chat completions
    #[value(name = "openai")]
    OpenAi,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "https://api.anthropic.com",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-3-haiku-20240307",
            LlmProvider::OpenAi => "gpt-4o-mini",
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Characters of paper text sent per request
    pub max_input_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl LlmConfig {
    /// Defaults for `provider` with the given key.
    pub fn new(provider: LlmProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_string(),
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            max_input_chars: 40_000,
            max_tokens: 2_000,
            temperature: 0.0,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Result of extracting one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub rows: Vec<ObservationRow>,
    pub usage: TokenUsage,
    /// The model answered, but not with a usable JSON array
    pub malformed: bool,
}

/// Turns a document's text into observation rows.
pub trait SpeciesExtractor: Send + Sync {
    /// Extract rows from `document.raw_text`.
    ///
    /// Errors only when the service itself failed (after retries); bad model
    /// output is reported through [`Extraction::malformed`].
    fn extract<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Extraction>>;
}

/// Extractor backed by an Anthropic or OpenAI-compatible chat API.
pub struct LlmSpeciesExtractor {
    client: reqwest::Client,
    config: LlmConfig,
    retry: RetryPolicy,
}

/// Raw model answer plus usage
struct Completion {
    content: String,
    usage: TokenUsage,
}

impl LlmSpeciesExtractor {
    pub fn new(config: LlmConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RefSpeciesError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config, retry })
    }

    async fn complete(&self, user_prompt: &str) -> Result<Completion> {
        match self.config.provider {
            LlmProvider::Anthropic => self.complete_anthropic(user_prompt).await,
            LlmProvider::OpenAi => self.complete_openai(user_prompt).await,
        }
    }

    async fn complete_anthropic(&self, user_prompt: &str) -> Result<Completion> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": user_prompt}]
        });

        let api_url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| RefSpeciesError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        let content = api_response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { content, usage })
    }

    async fn complete_openai(&self, user_prompt: &str) -> Result<Completion> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let api_url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RefSpeciesError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let content = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_parse("No choices in LLM response")?
            .message
            .content
            .unwrap_or_default();

        Ok(Completion { content, usage })
    }

    async fn extract_document(&self, document: &Document) -> Result<Extraction> {
        let text = document.raw_text.as_deref().unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(Extraction::default());
        }

        let mut budget = text.chars().count().min(self.config.max_input_chars);
        let mut shrinks = 0;

        let completion = loop {
            let prompt = build_user_prompt(truncate_chars(text, budget));
            let prompt = prompt.as_str();
            debug!(doi = %document.identifier, chars = budget, "Sending species extraction request");

            match self.retry.run("species-extraction", move || self.complete(prompt)).await {
                Ok(completion) => break completion,
                Err(e) if is_input_too_long(&e) && shrinks < MAX_SHRINKS && budget > MIN_INPUT_CHARS => {
                    shrinks += 1;
                    budget = (budget / 2).max(MIN_INPUT_CHARS);
                    warn!(doi = %document.identifier, chars = budget, attempt = shrinks, "Input rejected as too long, shrinking");
                }
                Err(e) => return Err(e),
            }
        };

        let (rows, malformed) = match parse_species_response(&completion.content, document) {
            Some(rows) => (rows, false),
            None => (Vec::new(), true),
        };
        info!(doi = %document.identifier, rows = rows.len(), "Species extraction complete");

        Ok(Extraction {
            rows,
            usage: completion.usage,
            malformed,
        })
    }
}

impl SpeciesExtractor for LlmSpeciesExtractor {
    fn extract<'a>(&'a self, document: &'a Document) -> BoxFuture<'a, Result<Extraction>> {
        Box::pin(self.extract_document(document))
    }
}

// === API Response Types ===

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// First `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// HTTP 413, or a 400 whose message complains about input size.
fn is_input_too_long(error: &RefSpeciesError) -> bool {
    match error {
        RefSpeciesError::Permanent { code: 413, .. } => true,
        RefSpeciesError::Permanent { code: 400, message } => {
            let message = message.to_lowercase();
            ["too long", "too large", "context length", "maximum length", "max_tokens", "tokens"]
                .iter()
                .any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

/// Parse model output into rows; `None` when it is not usable JSON.
pub fn parse_species_response(content: &str, document: &Document) -> Option<Vec<ObservationRow>> {
    let json_str = extract_json(content);
    let items = match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Array(items)) => items,
        Ok(obj @ Value::Object(_)) => vec![obj],
        Ok(other) => {
            info!(kind = json_kind(&other), "LLM output is not a JSON array - zero rows");
            return None;
        }
        Err(e) => {
            let preview: String = content.chars().take(200).collect();
            info!(error = %e, content_preview = %preview, "LLM output parse failed - zero rows");
            return None;
        }
    };

    let title = document.title.trim().to_string();
    let rows = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let species = item.get("species").and_then(scalar_text)?;
            let number = item
                .get("number")
                .and_then(scalar_text)
                .filter(|n| !n.eq_ignore_ascii_case(NOT_SPECIFIED));
            Some(ObservationRow {
                doi: document.identifier.clone(),
                species,
                abundance_or_biomass: item
                    .get("abundance_or_biomass")
                    .and_then(scalar_text)
                    .unwrap_or_else(|| NOT_SPECIFIED.to_string()),
                number,
                location: item
                    .get("location")
                    .and_then(scalar_text)
                    .unwrap_or_else(|| UNSPECIFIED.to_string()),
                distance_from_seed: document.distance,
                title: title.clone(),
            })
        })
        .collect::<Vec<_>>();

    if rows.len() < items.len() {
        debug!(dropped = items.len() - rows.len(), "Dropped LLM items without a species");
    }
    Some(rows)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stringify a JSON value; empty strings and nulls count as missing.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Extract JSON from LLM response (handles markdown code blocks and prose)
fn extract_json(content: &str) -> &str {
    let mut trimmed = content.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the fence line (which may carry a language tag) and the closing fence
        trimmed = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        trimmed = trimmed.trim_end().trim_end_matches("```").trim();
    }

    let start = trimmed.find(['[', '{']);
    let Some(start) = start else {
        return trimmed;
    };
    let closer = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    match trimmed.rfind(closer) {
        Some(end) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
