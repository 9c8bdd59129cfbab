//! TOML configuration.
//!
//! Every section except `[db]` and `[artifacts]` is optional; missing
//! fields take the defaults below. [`load_config`] parses and validates in
//! one step so commands never see an inconsistent config.

use anyhow::{bail, Context, Result};
use phaply_core::{ChunkerConfig, FusionParams};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// HuggingFace `tokenizer.json` used for token budgets. Without it the
/// 4-characters-per-token estimate is used.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Extra words for the Vietnamese segmenter, one per line.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SegmenterConfig {
    #[serde(default)]
    pub dictionary_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_parent_max")]
    pub parent_max_tokens: usize,
    #[serde(default = "default_parent_overlap")]
    pub parent_overlap_tokens: usize,
    #[serde(default = "default_child_max")]
    pub child_max_tokens: usize,
    #[serde(default = "default_child_overlap")]
    pub child_overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            parent_max_tokens: default_parent_max(),
            parent_overlap_tokens: default_parent_overlap(),
            child_max_tokens: default_child_max(),
            child_overlap_tokens: default_child_overlap(),
        }
    }
}

fn default_parent_max() -> usize {
    ChunkerConfig::PARENT.max_tokens
}
fn default_parent_overlap() -> usize {
    ChunkerConfig::PARENT.overlap_tokens
}
fn default_child_max() -> usize {
    ChunkerConfig::CHILD.max_tokens
}
fn default_child_overlap() -> usize {
    ChunkerConfig::CHILD.overlap_tokens
}

impl ChunkingConfig {
    pub fn parent(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.parent_max_tokens,
            overlap_tokens: self.parent_overlap_tokens,
        }
    }

    pub fn child(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.child_max_tokens,
            overlap_tokens: self.child_overlap_tokens,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    pub cache_path: PathBuf,
}

impl ArtifactsConfig {
    /// Exclusive lock file held while a rebuild runs.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.cache_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub lexical_k: usize,
    #[serde(default = "default_k")]
    pub vector_k: usize,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_k: default_k(),
            vector_k: default_k(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_k() -> usize {
    15
}
fn default_lexical_weight() -> f32 {
    0.6
}
fn default_vector_weight() -> f32 {
    0.4
}
fn default_rrf_k() -> f32 {
    60.0
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            lexical_weight: self.lexical_weight,
            vector_weight: self.vector_weight,
            rrf_k: self.rrf_k,
            lexical_k: self.lexical_k,
            vector_k: self.vector_k,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            base_url: default_openai_url(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound for one answer, retries included.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            base_url: default_openai_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_llm_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_secs: default_ttl_secs(),
            capacity: default_capacity(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_capacity() -> usize {
    1000
}
fn default_sweep_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            burst: default_burst(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_rpm() -> u32 {
    60
}
fn default_burst() -> u32 {
    10
}
fn default_max_wait_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let parent = config.chunking.parent();
    let child = config.chunking.child();
    parent
        .validate()
        .map_err(|e| anyhow::anyhow!("chunking (parent): {}", e))?;
    child
        .validate()
        .map_err(|e| anyhow::anyhow!("chunking (child): {}", e))?;
    if child.max_tokens > parent.max_tokens {
        bail!("chunking.child_max_tokens must not exceed chunking.parent_max_tokens");
    }

    let r = &config.retrieval;
    if r.lexical_k < 1 || r.vector_k < 1 {
        bail!("retrieval.lexical_k and retrieval.vector_k must be >= 1");
    }
    if r.lexical_weight < 0.0 || r.vector_weight < 0.0 {
        bail!("retrieval weights must be >= 0");
    }
    if r.lexical_weight + r.vector_weight <= 0.0 {
        bail!("retrieval.lexical_weight and retrieval.vector_weight must not both be 0");
    }
    if r.rrf_k < 0.0 {
        bail!("retrieval.rrf_k must be >= 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
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
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!("Unknown llm provider: '{}'. Must be disabled or openai.", other),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        bail!("llm.model must be specified when provider is '{}'", config.llm.provider);
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    if config.cache.enabled && (config.cache.capacity == 0 || config.cache.ttl_secs == 0) {
        bail!("cache.capacity and cache.ttl_secs must be > 0 when the cache is enabled");
    }
    if config.rate_limit.requests_per_minute == 0 || config.rate_limit.burst == 0 {
        bail!("rate_limit.requests_per_minute and rate_limit.burst must be > 0");
    }

    Ok(())
}
