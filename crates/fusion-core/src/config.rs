//! Configuration types for the search engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FusionError, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Embedding worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Weighted hybrid scoring configuration.
    #[serde(default)]
    pub hybrid: HybridConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: 30000,
        }
    }
}

/// Which embedding provider the worker talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic local hashing embedder (development and tests).
    #[default]
    Hash,
    /// OpenAI-compatible HTTP embeddings endpoint.
    Http,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model identifier stored with each vector.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model version stored with each vector.
    #[serde(default = "default_model_version")]
    pub version: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Base URL of the HTTP provider.
    #[serde(default)]
    pub api_base: String,

    /// Request path appended to `api_base`.
    #[serde(default = "default_embedding_path")]
    pub path: String,

    /// Bearer token; falls back to `FUSION_EMBEDDING_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Hash,
            model: default_model(),
            version: default_model_version(),
            dimension: default_dimension(),
            api_base: String::new(),
            path: default_embedding_path(),
            api_key: None,
        }
    }
}

/// Embedding worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Attempts after which a row is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep between empty polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on one provider call.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,

    /// Grace period after which a `processing` row may be reclaimed.
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: u64,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Number of concurrent workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How often retry release and stale re-queue run.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            poll_interval_ms: 500,
            provider_timeout_ms: 30000,
            stale_processing_secs: 300,
            base_backoff_ms: 500,
            max_backoff_ms: 30000,
            concurrency: 1,
            maintenance_interval_secs: 60,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// RRF constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Default number of results.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Maximum number of results.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Minimum trigram similarity for the fuzzy signal.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f32,

    /// Candidates kept per signal per rewrite.
    #[serde(default = "default_signal_cap")]
    pub signal_cap: u32,

    /// Maximum number of query rewrites per request.
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: usize,

    /// Embed query rewrites for the vector signal. Off by default so a
    /// text search never waits on the provider.
    #[serde(default)]
    pub embed_queries: bool,

    /// Budget for embedding all rewrites of one query.
    #[serde(default = "default_query_embed_timeout")]
    pub query_embed_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            default_limit: 20,
            max_limit: 100,
            fuzzy_threshold: 0.15,
            signal_cap: 100,
            max_rewrites: 3,
            embed_queries: false,
            query_embed_timeout_ms: 2000,
        }
    }
}

/// Weighted hybrid scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_entity_weight")]
    pub entity_weight: f32,

    /// Objects scoring below this are not admitted.
    #[serde(default)]
    pub min_score: f32,

    /// Objects matching fewer entities than this fraction are not admitted.
    #[serde(default)]
    pub min_entity_match: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            entity_weight: 0.3,
            min_score: 0.0,
            min_entity_match: 0.0,
        }
    }
}

// Default value functions

fn default_busy_timeout() -> u32 {
    30000
}

fn default_model() -> String {
    "hash-embedder".to_string()
}

fn default_model_version() -> String {
    "1".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_embedding_path() -> String {
    "/v1/embeddings".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    500
}

fn default_provider_timeout() -> u64 {
    30000
}

fn default_stale_processing() -> u64 {
    300
}

fn default_base_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30000
}

fn default_concurrency() -> usize {
    1
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_rrf_k() -> u32 {
    60
}

fn default_limit() -> u32 {
    20
}

fn default_max_limit() -> u32 {
    100
}

fn default_fuzzy_threshold() -> f32 {
    0.15
}

fn default_signal_cap() -> u32 {
    100
}

fn default_max_rewrites() -> usize {
    3
}

fn default_query_embed_timeout() -> u64 {
    2000
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_entity_weight() -> f32 {
    0.3
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fusion")
        .join("index.db")
}

impl FusionConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FusionError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fusion").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("fusion.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let worker = &self.worker;
        if worker.max_attempts == 0 {
            return Err(FusionError::config("worker.max_attempts must be at least 1"));
        }
        if worker.concurrency == 0 {
            return Err(FusionError::config("worker.concurrency must be at least 1"));
        }
        if worker.provider_timeout_ms == 0 {
            return Err(FusionError::config("worker.provider_timeout_ms must be positive"));
        }
        if worker.max_backoff_ms < worker.base_backoff_ms {
            return Err(FusionError::config(
                "worker.max_backoff_ms must not be below worker.base_backoff_ms",
            ));
        }

        let search = &self.search;
        if search.signal_cap == 0 || search.max_limit == 0 || search.max_rewrites == 0 {
            return Err(FusionError::config(
                "search.signal_cap, search.max_limit and search.max_rewrites must be positive",
            ));
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            return Err(FusionError::config(
                "search.default_limit must be between 1 and search.max_limit",
            ));
        }
        if !(0.0..=1.0).contains(&search.fuzzy_threshold) {
            return Err(FusionError::config("search.fuzzy_threshold must be within [0, 1]"));
        }

        let hybrid = &self.hybrid;
        if hybrid.vector_weight < 0.0 || hybrid.entity_weight < 0.0 {
            return Err(FusionError::config("hybrid weights must not be negative"));
        }
        if !(0.0..=1.0).contains(&hybrid.min_entity_match) {
            return Err(FusionError::config("hybrid.min_entity_match must be within [0, 1]"));
        }

        if self.embedding.dimension == 0 {
            return Err(FusionError::config("embedding.dimension must be positive"));
        }
        if self.embedding.provider == ProviderKind::Http && self.embedding.api_base.is_empty() {
            return Err(FusionError::config(
                "embedding.api_base is required for the http provider",
            ));
        }

        Ok(())
    }
}
