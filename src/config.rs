use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the environment variable holding the admin key.
    /// When the variable is unset, key-lifecycle endpoints are disabled.
    #[serde(default = "default_admin_key_env")]
    pub admin_key_env: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Persistent state layout: a single data root holding the SQLite database.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    /// "openai" or "disabled"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-batch timeout for embedding calls
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// When true, indexing continues keyword-only if the embedder fails;
    /// when false an embedding failure fails the task.
    #[serde(default)]
    pub allow_degraded: bool,
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    /// Semantic queries fetch limit * over_fetch candidates before filtering
    #[serde(default = "default_over_fetch")]
    pub over_fetch: usize,
    /// Hybrid blend weight for the semantic side (alpha)
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Number of chunks embedded per batch during ingest
    #[serde(default = "default_embed_batch")]
    pub embed_batch_size: usize,
}

/// Rate limiting configuration (requests per minute)
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_enabled")]
    pub enabled: bool,
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,
    #[serde(default = "default_search_rpm")]
    pub search_per_minute: u32,
    #[serde(default = "default_index_rpm")]
    pub index_per_minute: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_admin_key_env() -> String {
    "FINDEX_ADMIN_KEY".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_provider() -> String {
    "disabled".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_batch_size() -> usize {
    100
}

fn default_embed_timeout() -> u64 {
    15
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_limit() -> usize {
    10
}

fn default_threshold() -> f32 {
    0.3
}

fn default_over_fetch() -> usize {
    3
}

fn default_semantic_weight() -> f32 {
    0.5
}

fn default_search_timeout() -> u64 {
    30
}

fn default_max_tasks() -> usize {
    5
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_embed_batch() -> usize {
    32
}

fn default_rate_enabled() -> bool {
    true
}

fn default_global_rpm() -> u32 {
    100
}

fn default_search_rpm() -> u32 {
    50
}

fn default_index_rpm() -> u32 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_key_env: default_admin_key_env(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            timeout_secs: default_embed_timeout(),
            cache_capacity: default_cache_capacity(),
            allow_degraded: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_threshold: default_threshold(),
            over_fetch: default_over_fetch(),
            semantic_weight: default_semantic_weight(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_tasks(),
            max_file_size_bytes: default_max_file_size(),
            embed_batch_size: default_embed_batch(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_enabled(),
            global_per_minute: default_global_rpm(),
            search_per_minute: default_search_rpm(),
            index_per_minute: default_index_rpm(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for the config file in this order:
    /// 1. Path specified in FINDEX_CONFIG environment variable
    /// 2. ./config.toml in the current directory
    ///
    /// A missing config file yields the built-in defaults.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_path = std::env::var("FINDEX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config: Config = if config_path.exists() {
            let config_str = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
            toml::from_str(&config_str).context("Failed to parse config.toml")?
        } else {
            Config::default()
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.embeddings.provider.as_str() {
            "openai" | "disabled" => {}
            other => anyhow::bail!("embeddings.provider must be \"openai\" or \"disabled\", got \"{}\"", other),
        }

        if self.embeddings.provider == "openai" && self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.search.default_limit == 0 {
            anyhow::bail!("search.default_limit must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.search.default_threshold) {
            anyhow::bail!("search.default_threshold must be between 0.0 and 1.0");
        }

        if !(0.0..=1.0).contains(&self.search.semantic_weight) {
            anyhow::bail!("search.semantic_weight must be between 0.0 and 1.0");
        }

        if self.search.over_fetch == 0 {
            anyhow::bail!("search.over_fetch must be greater than 0");
        }

        if self.indexing.max_concurrent_tasks == 0 {
            anyhow::bail!("indexing.max_concurrent_tasks must be greater than 0");
        }

        if self.indexing.embed_batch_size == 0 {
            anyhow::bail!("indexing.embed_batch_size must be greater than 0");
        }

        Ok(())
    }

    /// Path of the SQLite database inside the data root
    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join("findex.db")
    }

    /// Admin key from the configured environment variable, if set
    pub fn admin_key(&self) -> Option<String> {
        std::env::var(&self.server.admin_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}
