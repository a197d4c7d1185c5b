use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub index: IndexConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
}

/// Where the manifest, index artifacts and cached sources live
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub manifest_path: PathBuf,
    /// Base path of the index; `.index` and `.chunks.json` artifacts are derived from it.
    pub index_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Caller-level timeout for a whole build. None = unbounded.
    #[serde(default)]
    pub build_timeout_secs: Option<u64>,
}

/// Backing corpus kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    S3,
}

/// Corpus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Root directory for `kind = "local"`
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Bucket name for `kind = "s3"`
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

/// Source caching policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,
}

/// Ingestion pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Worker count; 0 means available parallelism
    #[serde(default)]
    pub max_workers: usize,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            job_timeout_secs: None,
            chunk_size_tokens: default_chunk_size_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
        }
    }
}

impl IngestConfig {
    /// Effective worker count
    pub fn workers(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn default_chunk_size_tokens() -> usize {
    300
}

fn default_chunk_overlap_tokens() -> usize {
    50
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_query_cache_capacity")]
    pub query_cache_capacity: usize,
}

fn default_query_cache_capacity() -> usize {
    1000
}

/// Query-time retrieval and merge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_top_n_rerank")]
    pub top_n_rerank: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_merge_window")]
    pub merge_window: usize,
    #[serde(default)]
    pub proximity_merge: bool,
    #[serde(default = "default_proximity_gap")]
    pub proximity_gap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_n_rerank: default_top_n_rerank(),
            score_threshold: default_score_threshold(),
            merge_window: default_merge_window(),
            proximity_merge: false,
            proximity_gap: default_proximity_gap(),
        }
    }
}

fn default_top_k() -> usize {
    40
}

fn default_top_n_rerank() -> usize {
    10
}

fn default_score_threshold() -> f32 {
    0.2
}

fn default_merge_window() -> usize {
    1
}

fn default_proximity_gap() -> usize {
    2
}

/// Reranker provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_rerank_api_key_env")]
    pub api_key_env: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: default_rerank_model(),
            api_key_env: default_rerank_api_key_env(),
        }
    }
}

fn default_rerank_provider() -> String {
    "none".to_string()
}

fn default_rerank_model() -> String {
    "rerank-english-v3.0".to_string()
}

fn default_rerank_api_key_env() -> String {
    "COHERE_API_KEY".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGINDEX_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGINDEX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate configuration from an explicit path
    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.source.kind {
            SourceKind::Local => {
                let root = self
                    .source
                    .root
                    .as_ref()
                    .context("source.root is required when source.kind = \"local\"")?;
                if !root.is_dir() {
                    anyhow::bail!(
                        "source.root must be an existing directory: {}",
                        root.display()
                    );
                }
            }
            SourceKind::S3 => {
                if self.source.bucket.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!("source.bucket is required when source.kind = \"s3\"");
                }
            }
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            anyhow::bail!("retrieval.score_threshold must be between 0.0 and 1.0");
        }

        if self.ingest.chunk_size_tokens == 0 {
            anyhow::bail!("ingest.chunk_size_tokens must be greater than 0");
        }

        if self.ingest.chunk_overlap_tokens >= self.ingest.chunk_size_tokens {
            anyhow::bail!("ingest.chunk_overlap_tokens must be less than chunk_size_tokens");
        }

        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be greater than 0");
        }

        Ok(())
    }

    /// Get manifest path
    pub fn manifest_path(&self) -> &Path {
        &self.index.manifest_path
    }

    /// Get index base path
    pub fn index_path(&self) -> &Path {
        &self.index.index_path
    }
}
