use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Connection pool size. Writes all serialize through SQLite's
    /// single writer anyway, so a small pool suffices.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"disabled"` or `"openai"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    /// Extraction attempts per segment before the segment fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Default parse mode forwarded to the extractor.
    #[serde(default)]
    pub parse_mode: Option<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            parse_mode: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Concurrent segments in flight. `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
    /// Cap on the segment preview list logged after planning.
    #[serde(default = "default_segment_preview_cap")]
    pub segment_preview_cap: usize,
    /// Maximum length of generated task slugs.
    #[serde(default = "default_slug_max_len")]
    pub slug_max_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            segment_preview_cap: default_segment_preview_cap(),
            slug_max_len: default_slug_max_len(),
        }
    }
}

fn default_segment_preview_cap() -> usize {
    25
}
fn default_slug_max_len() -> usize {
    64
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.parser.max_attempts == 0 {
        anyhow::bail!("parser.max_attempts must be > 0");
    }

    if config.pipeline.segment_preview_cap == 0 {
        anyhow::bail!("pipeline.segment_preview_cap must be > 0");
    }

    if config.pipeline.slug_max_len < 8 {
        anyhow::bail!("pipeline.slug_max_len must be >= 8");
    }

    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
