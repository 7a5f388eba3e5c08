//! Summarizer provider abstraction and implementations.
//!
//! Defines the [`Summarizer`] trait — the single capability boundary to the
//! external language model — and concrete implementations:
//! - **[`OpenAiSummarizer`]** — calls an OpenAI-compatible chat-completions
//!   endpoint with a per-call timeout.
//! - **[`NaiveSummarizer`]** — offline extractive fallback; deterministic,
//!   no network. Lets the full pipeline run in tests and air-gapped setups.
//! - **[`DisabledSummarizer`]** — returns errors; used when no provider is
//!   configured.
//!
//! A provider is stateless per call and performs no retries; retry policy
//! belongs to the pipeline that calls it.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::SummarizerConfig;
use crate::error::ProviderError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// The external summarization capability.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Returns the provider identifier (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Produce prose for `text`, guided by `instruction` when present.
    ///
    /// Fails with [`ProviderError`] when the call errors, times out, or
    /// returns empty content.
    async fn summarize(
        &self,
        text: &str,
        instruction: Option<&str>,
    ) -> Result<String, ProviderError>;
}

// ============ Disabled ============

/// A no-op provider that always returns errors.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn summarize(
        &self,
        _text: &str,
        _instruction: Option<&str>,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ============ Naive ============

/// Offline extractive summarizer: keeps the leading sentences of the input
/// up to a fixed budget. Ignores the instruction. Deterministic.
pub struct NaiveSummarizer {
    max_output_chars: usize,
}

impl NaiveSummarizer {
    pub fn new() -> Self {
        Self {
            max_output_chars: 600,
        }
    }
}

impl Default for NaiveSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for NaiveSummarizer {
    fn name(&self) -> &str {
        "naive"
    }

    async fn summarize(
        &self,
        text: &str,
        _instruction: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut out = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(line);
            if out.len() >= self.max_output_chars {
                break;
            }
        }
        if out.len() > self.max_output_chars {
            let cut = floor_char_boundary(&out, self.max_output_chars);
            out.truncate(cut);
        }
        if out.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(out)
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

// ============ OpenAI ============

/// Provider calling an OpenAI-compatible `POST /chat/completions` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable. The per-call timeout
/// is enforced on the HTTP client; no retries happen here.
pub struct OpenAiSummarizer {
    model: String,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(
        &self,
        text: &str,
        instruction: Option<&str>,
    ) -> Result<String, ProviderError> {
        let system = instruction.unwrap_or("Summarize the following text concisely.");
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": text },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout_secs)
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: truncate_preview(&message, 300),
            });
        }

        let payload: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout_secs)
            } else {
                ProviderError::InvalidResponse(e.to_string())
            }
        })?;
        parse_chat_completion(&payload)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_completion(payload: &serde_json::Value) -> Result<String, ProviderError> {
    let content = payload
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ProviderError::InvalidResponse("missing choices[0].message.content".to_string())
        })?;

    if content.trim().is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }
    Ok(content.to_string())
}

fn truncate_preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Create the appropriate [`Summarizer`] based on configuration.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"openai"`   | [`OpenAiSummarizer`] |
/// | `"naive"`    | [`NaiveSummarizer`] |
/// | `"disabled"` | [`DisabledSummarizer`] |
pub fn create_summarizer(config: &SummarizerConfig) -> Result<std::sync::Arc<dyn Summarizer>> {
    match config.provider.as_str() {
        "openai" => Ok(std::sync::Arc::new(OpenAiSummarizer::new(config)?)),
        "naive" => Ok(std::sync::Arc::new(NaiveSummarizer::new())),
        "disabled" => Ok(std::sync::Arc::new(DisabledSummarizer)),
        other => bail!("Unknown summarizer provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_always_errors() {
        let err = DisabledSummarizer
            .summarize("anything", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Disabled));
    }

    #[tokio::test]
    async fn naive_is_deterministic_and_bounded() {
        let s = NaiveSummarizer::new();
        let text = (0..100)
            .map(|i| format!("line number {} with some content", i))
            .collect::<Vec<_>>()
            .join("\n");
        let a = s.summarize(&text, None).await.unwrap();
        let b = s.summarize(&text, None).await.unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(a.len() <= 600 + 40, "output roughly bounded: {}", a.len());
        assert!(a.starts_with("line number 0"));
    }

    #[tokio::test]
    async fn naive_rejects_blank_input() {
        let err = NaiveSummarizer::new()
            .summarize("  \n \n", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyCompletion));
    }

    #[test]
    fn parse_chat_completion_extracts_content() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "a summary" } }]
        });
        assert_eq!(parse_chat_completion(&payload).unwrap(), "a summary");
    }

    #[test]
    fn parse_chat_completion_rejects_blank_content() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "content": "   " } }]
        });
        assert!(matches!(
            parse_chat_completion(&payload).unwrap_err(),
            ProviderError::EmptyCompletion
        ));
    }

    #[test]
    fn parse_chat_completion_rejects_malformed_payload() {
        let payload = serde_json::json!({ "error": { "message": "boom" } });
        assert!(matches!(
            parse_chat_completion(&payload).unwrap_err(),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[test]
    fn create_summarizer_rejects_unknown_provider() {
        let cfg = SummarizerConfig {
            provider: "carrier-pigeon".to_string(),
            ..SummarizerConfig::default()
        };
        assert!(create_summarizer(&cfg).is_err());
    }

    #[test]
    fn create_summarizer_naive() {
        let cfg = SummarizerConfig {
            provider: "naive".to_string(),
            ..SummarizerConfig::default()
        };
        assert_eq!(create_summarizer(&cfg).unwrap().name(), "naive");
    }
}
