//! AI providers: the only code that talks to third-party model APIs.
//!
//! ARCHITECTURAL RULE: orchestration never calls a vendor API directly.
//! Everything goes through `AiProvider`, so the failover engine can treat
//! every backend as an interchangeable, fallible capability set.
//!
//! Concrete backends are `ChatBackend` variants chosen from configuration at
//! startup; tests substitute their own `AiProvider` implementations.

use async_trait::async_trait;
use reqwest::Response;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::analysis::{AnalysisResult, MatchResult, SuggestionList};

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod prompts;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Output budget shared by every backend.
pub(crate) const MAX_OUTPUT_TOKENS: u32 = 2048;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider returned empty content")]
    EmptyContent,

    #[error("Provider did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

/// The capability contract every AI backend exposes.
///
/// Failures are opaque to callers beyond their `Display` text: the engine
/// logs them and moves on to the next candidate.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, text: &str, options: &Value) -> Result<AnalysisResult, ProviderError>;

    async fn generate_suggestions(
        &self,
        text: &str,
        job_description: Option<&str>,
        options: &Value,
    ) -> Result<Vec<String>, ProviderError>;

    async fn match_against_description(
        &self,
        text: &str,
        job_description: &str,
        options: &Value,
    ) -> Result<MatchResult, ProviderError>;
}

/// Which vendor API a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    /// Prefix for this provider's environment variables, e.g. `OPENAI`.
    pub fn env_prefix(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI",
            ProviderKind::OpenAi => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
        }
    }

    pub fn default_priority(self) -> i32 {
        match self {
            ProviderKind::Gemini => 1,
            ProviderKind::OpenAi => 2,
            ProviderKind::Anthropic => 3,
        }
    }

    /// USD per 1000 estimated tokens.
    pub fn default_cost_per_unit(self) -> f64 {
        match self {
            ProviderKind::Gemini => 0.000_5,
            ProviderKind::OpenAi => 0.002,
            ProviderKind::Anthropic => 0.003,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => gemini::DEFAULT_MODEL,
            ProviderKind::OpenAi => openai::DEFAULT_MODEL,
            ProviderKind::Anthropic => anthropic::DEFAULT_MODEL,
        }
    }
}

/// Vendor-specific transport. Each variant turns (system, prompt) into raw text.
pub enum ChatBackend {
    Gemini(GeminiClient),
    OpenAi(OpenAiClient),
    Anthropic(AnthropicClient),
}

impl ChatBackend {
    /// Builds the backend for `kind` on top of the shared HTTP client.
    pub fn new(kind: ProviderKind, http: reqwest::Client, api_key: String, model: String) -> Self {
        match kind {
            ProviderKind::Gemini => ChatBackend::Gemini(GeminiClient::new(http, api_key, model)),
            ProviderKind::OpenAi => ChatBackend::OpenAi(OpenAiClient::new(http, api_key, model)),
            ProviderKind::Anthropic => {
                ChatBackend::Anthropic(AnthropicClient::new(http, api_key, model))
            }
        }
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        match self {
            ChatBackend::Gemini(c) => c.complete(system, prompt).await,
            ChatBackend::OpenAi(c) => c.complete(system, prompt).await,
            ChatBackend::Anthropic(c) => c.complete(system, prompt).await,
        }
    }
}

/// An HTTP-backed provider: prompt building and JSON decoding on top of a
/// `ChatBackend`. One instance per configured vendor.
pub struct LlmProvider {
    name: String,
    backend: ChatBackend,
}

impl LlmProvider {
    pub fn new(name: impl Into<String>, backend: ChatBackend) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    /// Calls the backend and deserializes the text response as JSON.
    /// The prompt must instruct the model to return valid JSON.
    async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, ProviderError> {
        let text = self.backend.complete(system, prompt).await?;
        let text = strip_json_fences(&text);
        if text.is_empty() {
            return Err(ProviderError::EmptyContent);
        }
        serde_json::from_str(text).map_err(ProviderError::Parse)
    }
}

#[async_trait]
impl AiProvider for LlmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, text: &str, options: &Value) -> Result<AnalysisResult, ProviderError> {
        let prompt = prompts::analysis_prompt(text, options);
        self.call_json(&prompt, prompts::ANALYSIS_SYSTEM).await
    }

    async fn generate_suggestions(
        &self,
        text: &str,
        job_description: Option<&str>,
        options: &Value,
    ) -> Result<Vec<String>, ProviderError> {
        let prompt = prompts::suggestions_prompt(text, job_description, options);
        let list: SuggestionList = self.call_json(&prompt, prompts::SUGGESTIONS_SYSTEM).await?;
        Ok(list.suggestions)
    }

    async fn match_against_description(
        &self,
        text: &str,
        job_description: &str,
        options: &Value,
    ) -> Result<MatchResult, ProviderError> {
        let prompt = prompts::matching_prompt(text, job_description, options);
        self.call_json(&prompt, prompts::MATCHING_SYSTEM).await
    }
}

#[derive(Debug, Deserialize)]
struct VendorError {
    error: VendorErrorBody,
}

#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    message: String,
}

/// Turns a vendor HTTP response into `T`, mapping any non-2xx status to
/// `ProviderError::Api` with the vendor's own message when one is present.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<VendorError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body = response.text().await?;
    debug!("Provider response received ({} bytes)", body.len());
    Ok(serde_json::from_str(&body)?)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => {
            let stripped = stripped.trim_start();
            stripped
                .strip_suffix("```")
                .map(str::trim)
                .unwrap_or(stripped)
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "  {\"key\": \"value\"}\n";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_unterminated() {
        let input = "```json\n{\"key\": 1}";
        assert_eq!(strip_json_fences(input), "{\"key\": 1}");
    }

    #[test]
    fn test_provider_kind_defaults_are_ordered() {
        let priorities: Vec<i32> = ProviderKind::ALL
            .iter()
            .map(|k| k.default_priority())
            .collect();
        assert_eq!(priorities, vec![1, 2, 3]);
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
        assert_eq!(ProviderKind::Gemini.env_prefix(), "GEMINI");
    }

    #[test]
    fn test_vendor_error_body_parses() {
        let body = r#"{"error": {"type": "invalid_request_error", "message": "bad key"}}"#;
        let parsed: VendorError = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "bad key");
    }
}
