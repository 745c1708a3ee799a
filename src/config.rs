use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub curriculum: CurriculumConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Storage and artifact locations
#[derive(Debug, Clone, Deserialize)]
pub struct CurriculumConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_chain_dir")]
    pub chain_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Anchor resolution and subgraph expansion
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_anchor_limit")]
    pub anchor_limit: usize,
    #[serde(default = "default_module_limit")]
    pub module_limit: usize,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    /// Latin words shorter than this are not keywords.
    #[serde(default = "default_min_word_len")]
    pub min_word_len: usize,
    /// CJK runs shorter than this are not keywords.
    #[serde(default = "default_min_cjk_len")]
    pub min_cjk_len: usize,
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
    #[serde(default = "default_anchor_concurrency")]
    pub anchor_concurrency: usize,
    /// Recognised module name -> alias keywords.
    #[serde(default)]
    pub modules: BTreeMap<String, Vec<String>>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            anchor_limit: default_anchor_limit(),
            module_limit: default_module_limit(),
            sample_limit: default_sample_limit(),
            min_word_len: default_min_word_len(),
            min_cjk_len: default_min_cjk_len(),
            stop_words: default_stop_words(),
            anchor_concurrency: default_anchor_concurrency(),
            modules: BTreeMap::new(),
        }
    }
}

/// Content-generation collaborator (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Total attempts per node, including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Linear backoff: attempt `n` waits `n * backoff_secs` before retrying.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff unit, clamped to `0..=MAX_BACKOFF_SECS`.
    pub fn backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_secs.min(MAX_BACKOFF_SECS)).unwrap_or_default()
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                self.api_key_env
            )
        })
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("data/kg_export")
}

fn default_chain_dir() -> PathBuf {
    PathBuf::from("data/task_chains")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_hops() -> usize {
    2
}

fn default_anchor_limit() -> usize {
    10
}

fn default_module_limit() -> usize {
    20
}

fn default_sample_limit() -> usize {
    10
}

fn default_min_word_len() -> usize {
    4
}

fn default_min_cjk_len() -> usize {
    2
}

fn default_stop_words() -> Vec<String> {
    ["掌握", "的", "核心", "内容", "master", "learn", "core", "content", "about", "with"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_anchor_concurrency() -> usize {
    4
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_secs() -> f64 {
    1.0
}

/// Upper bound on `generation.backoff_secs`.
pub const MAX_BACKOFF_SECS: f64 = 300.0;

fn default_max_concurrency() -> usize {
    4
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in CURRICULUM_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("CURRICULUM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.max_hops == 0 {
            anyhow::bail!("retrieval.max_hops must be greater than 0");
        }
        if r.anchor_limit == 0 || r.module_limit == 0 || r.sample_limit == 0 {
            anyhow::bail!("retrieval anchor_limit, module_limit and sample_limit must be greater than 0");
        }
        if r.anchor_concurrency == 0 {
            anyhow::bail!("retrieval.anchor_concurrency must be greater than 0");
        }

        let g = &self.generation;
        if g.max_attempts == 0 {
            anyhow::bail!("generation.max_attempts must be at least 1");
        }
        if g.max_concurrency == 0 {
            anyhow::bail!("generation.max_concurrency must be greater than 0");
        }
        if !(0.0..=MAX_BACKOFF_SECS).contains(&g.backoff_secs) {
            anyhow::bail!("generation.backoff_secs must be between 0 and {}", MAX_BACKOFF_SECS);
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            anyhow::bail!("generation.temperature must be between 0.0 and 2.0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.curriculum.db_path
    }

    pub fn export_dir(&self) -> &Path {
        &self.curriculum.export_dir
    }

    pub fn chain_dir(&self) -> &Path {
        &self.curriculum.chain_dir
    }
}
