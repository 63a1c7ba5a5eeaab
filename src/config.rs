//! Configuration parsing and validation.
//!
//! The whole run is driven by one TOML file (default `./config/vrag.toml`).
//! Every section except `[corpus]` may be omitted; missing fields fall back
//! to the defaults below. [`load_config`] parses and validates the file once
//! at startup and the resulting [`Config`] is never mutated afterwards.
//!
//! API keys never live in the file. They are read from the environment
//! (after loading `.env`) into [`Credentials`] by [`Credentials::from_env`].
//!
//! ```toml
//! [corpus]
//! root = "./guidelines"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-large"
//! dims = 3072
//!
//! [rerank]
//! provider = "local"
//! model = "bge-reranker-base"
//!
//! [generation]
//! provider = "anthropic"
//! model = "claude-3-5-sonnet-20241022"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use vignette_rag_core::pipeline::{EmptyContextPolicy, PipelineSettings};
use vignette_rag_core::prompt::{
    PromptTemplate, DEFAULT_CHUNK_SEPARATOR, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPLATE,
};

/// Upper bound on `max_retries` for any service.
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub grading: GradingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.md", "**/*.txt", "**/*.docx", "**/*.pptx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: Some("text-embedding-3-large".to_string()),
            dims: Some(3072),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default)]
    pub empty_context: EmptyContextPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            empty_context: EmptyContextPolicy::default(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_min_score() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: None,
            top_n: default_top_n(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_provider() -> String {
    "local".to_string()
}
fn default_top_n() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            temperature: 0.0,
            max_tokens: default_generation_max_tokens(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "anthropic".to_string()
}
fn default_generation_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}
fn default_generation_max_tokens() -> u32 {
    512
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system")]
    pub system: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_separator")]
    pub chunk_separator: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system(),
            template: default_template(),
            chunk_separator: default_separator(),
        }
    }
}

fn default_system() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}
fn default_separator() -> String {
    DEFAULT_CHUNK_SEPARATOR.to_string()
}

impl PromptConfig {
    pub fn template(&self) -> Result<PromptTemplate> {
        PromptTemplate::new(
            self.system.clone(),
            &self.template,
            self.chunk_separator.clone(),
        )
        .context("invalid [prompt] template")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

/// The grader reuses `[generation]` unless overridden here.
#[derive(Debug, Deserialize, Clone)]
pub struct GradingConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_grading_delay_ms")]
    pub delay_ms: u64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            delay_ms: default_grading_delay_ms(),
        }
    }
}

fn default_grading_delay_ms() -> u64 {
    500
}

impl Config {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            rerank_top_n: self.rerank.top_n,
            empty_context: self.retrieval.empty_context,
        }
    }

    /// The generation settings used by the grader.
    pub fn grading_generation(&self) -> GenerationConfig {
        let mut g = self.generation.clone();
        if let Some(provider) = &self.grading.provider {
            g.provider = provider.clone();
        }
        if let Some(model) = &self.grading.model {
            g.model = model.clone();
        }
        g.temperature = 0.0;
        g
    }
}

/// API keys read once from the process environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            voyage_api_key: var("VOYAGE_API_KEY"),
        }
    }

    pub fn openai(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
    }

    pub fn anthropic(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))
    }

    pub fn voyage(&self) -> Result<&str> {
        self.voyage_api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("VOYAGE_API_KEY environment variable not set"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate TOML config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!(
            "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
            config.chunking.overlap_tokens,
            config.chunking.max_tokens
        );
    }

    if config.rerank.top_n < 1 {
        bail!("rerank.top_n must be >= 1");
    }
    if config.retrieval.top_k < config.rerank.top_n {
        bail!(
            "retrieval.top_k ({}) must be >= rerank.top_n ({})",
            config.retrieval.top_k,
            config.rerank.top_n
        );
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    for (section, retries) in [
        ("embedding", config.embedding.max_retries),
        ("rerank", config.rerank.max_retries),
        ("generation", config.generation.max_retries),
    ] {
        if retries > MAX_RETRIES_LIMIT {
            bail!("{}.max_retries must be <= {}", section, MAX_RETRIES_LIMIT);
        }
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.rerank.provider.as_str() {
        "local" | "voyage" => {}
        other => bail!(
            "Unknown rerank provider: '{}'. Must be local or voyage.",
            other
        ),
    }

    for provider in [
        Some(config.generation.provider.as_str()),
        config.grading.provider.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        match provider {
            "anthropic" | "openai" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be anthropic or openai.",
                other
            ),
        }
    }

    config.prompt.template()?;

    if config.batch.concurrency == 0 {
        bail!("batch.concurrency must be >= 1");
    }

    Ok(())
}
