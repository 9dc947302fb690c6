//! External text-generation collaborators.
//!
//! Defines the two seams the pipeline consumes — [`SegmentPlanner`] and
//! [`TaskExtractor`] — and concrete implementations:
//! - **Disabled** providers — return errors; used when no LLM is configured.
//! - **OpenAI** providers — call the chat completions API with retry and
//!   exponential backoff.
//!
//! The extractor's failures must stay distinguishable so the retry loop in
//! [`crate::parser`] can classify them: [`ExtractError::InvalidJson`],
//! [`ExtractError::EmptyOutput`], and [`ExtractError::SchemaValidation`]
//! are retriable with a corrective prompt; [`ExtractError::Fatal`]
//! (auth/config/network exhaustion) is not.
//!
//! # Retry Strategy (transport level)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Transport retries are invisible to the caller; the corrective retry
//! loop in [`crate::parser`] only sees the final classified outcome.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::segment::SegmentPlan;

/// Classified extraction failure.
///
/// Retriability drives the corrective retry loop: a retriable error gets
/// a correction note appended to the prompt and another attempt; a fatal
/// error terminates the segment immediately.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The model's output was not valid JSON.
    #[error("extractor returned invalid JSON: {0}")]
    InvalidJson(String),

    /// The model returned no content at all.
    #[error("extractor returned empty output")]
    EmptyOutput,

    /// The output was JSON but failed schema validation.
    #[error("extracted task failed schema validation: {0}")]
    SchemaValidation(String),

    /// Authorization, configuration, or exhausted-transport failure.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl ExtractError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ExtractError::InvalidJson(_)
                | ExtractError::EmptyOutput
                | ExtractError::SchemaValidation(_)
        )
    }
}

/// Plans how a line-numbered document splits into candidate task segments.
#[async_trait]
pub trait SegmentPlanner: Send + Sync {
    /// Ask the planner for non-overlapping candidate segments over the
    /// `L0001:`-numbered rendering of the document.
    ///
    /// Failure here is fatal to the whole job — planning is never retried
    /// with a corrective prompt.
    async fn plan(&self, numbered_text: &str) -> Result<SegmentPlan>;
}

/// Extracts one structured task from an assembled segment prompt payload.
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    /// Run structured extraction over the payload. Returns the raw JSON
    /// value; schema validation happens in [`crate::parser`].
    async fn extract(
        &self,
        source_text: &str,
        parse_mode: Option<&str>,
    ) -> Result<serde_json::Value, ExtractError>;
}

// ============ Disabled Providers ============

/// Planner used when `llm.provider = "disabled"`. Always errors.
pub struct DisabledPlanner;

#[async_trait]
impl SegmentPlanner for DisabledPlanner {
    async fn plan(&self, _numbered_text: &str) -> Result<SegmentPlan> {
        bail!("LLM provider is disabled; cannot plan segments")
    }
}

/// Extractor used when `llm.provider = "disabled"`. Always errors.
pub struct DisabledExtractor;

#[async_trait]
impl TaskExtractor for DisabledExtractor {
    async fn extract(
        &self,
        _source_text: &str,
        _parse_mode: Option<&str>,
    ) -> Result<serde_json::Value, ExtractError> {
        Err(ExtractError::Fatal(anyhow::anyhow!(
            "LLM provider is disabled; cannot extract tasks"
        )))
    }
}

// ============ OpenAI Providers ============

const PLANNER_SYSTEM_PROMPT: &str = "You split line-numbered therapy-skill documents into candidate \
task segments. Respond with a JSON object {\"tasks\": [{\"start_line\", \"end_line\", \
\"title_hint\", \"confidence\", \"reason\", \"context_blocks\": [{\"start_line\", \"end_line\", \
\"label\", \"reason\"}]}]}. Line numbers are 1-based and inclusive; segments must not overlap.";

const EXTRACTOR_SYSTEM_PROMPT: &str = "You extract exactly one structured therapy task from the \
given text. Respond with a JSON object with keys: title, description, skill_domain, \
base_difficulty, tags, language, criteria (id, label, description, rubric), examples (id, \
patient_text, difficulty, severity_label, language, meta), interaction_examples (id, title, \
patient_text, therapist_text, difficulty, language). Every example must carry a language code.";

/// Planner and extractor backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiClient {
    model: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Call the chat completions endpoint and return the assistant
    /// message content, with transport-level retry/backoff.
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .pointer("/choices/0/message/content")
                            .and_then(|c| c.as_str())
                            .unwrap_or_default();
                        return Ok(content.to_string());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

#[async_trait]
impl SegmentPlanner for OpenAiClient {
    async fn plan(&self, numbered_text: &str) -> Result<SegmentPlan> {
        let content = self.complete(PLANNER_SYSTEM_PROMPT, numbered_text).await?;
        let plan: SegmentPlan = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("planner returned an invalid plan: {}", e))?;
        Ok(plan)
    }
}

#[async_trait]
impl TaskExtractor for OpenAiClient {
    async fn extract(
        &self,
        source_text: &str,
        parse_mode: Option<&str>,
    ) -> Result<serde_json::Value, ExtractError> {
        let user = match parse_mode {
            Some(mode) => format!("Parse mode: {}\n\n{}", mode, source_text),
            None => source_text.to_string(),
        };

        let content = self
            .complete(EXTRACTOR_SYSTEM_PROMPT, &user)
            .await
            .map_err(ExtractError::Fatal)?;

        if content.trim().is_empty() {
            return Err(ExtractError::EmptyOutput);
        }

        serde_json::from_str(&content).map_err(|e| ExtractError::InvalidJson(e.to_string()))
    }
}

/// Create the configured [`SegmentPlanner`].
pub fn create_planner(config: &LlmConfig) -> Result<Box<dyn SegmentPlanner>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledPlanner)),
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Create the configured [`TaskExtractor`].
pub fn create_extractor(config: &LlmConfig) -> Result<Box<dyn TaskExtractor>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledExtractor)),
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriability() {
        assert!(ExtractError::InvalidJson("x".into()).is_retriable());
        assert!(ExtractError::EmptyOutput.is_retriable());
        assert!(ExtractError::SchemaValidation("missing language".into()).is_retriable());
        assert!(!ExtractError::Fatal(anyhow::anyhow!("401 unauthorized")).is_retriable());
    }

    #[tokio::test]
    async fn test_disabled_providers_error() {
        let planner = DisabledPlanner;
        assert!(planner.plan("L0001: hi").await.is_err());

        let extractor = DisabledExtractor;
        let err = extractor.extract("hi", None).await.unwrap_err();
        assert!(!err.is_retriable());
    }
}
