//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. `ATLAS_*` environment variables
//! 2. Project config (`.codeatlas/config.toml`)
//! 3. User config (`~/.config/codeatlas/config.toml`)
//! 4. Compiled-in defaults
//!
//! `Config::validate` checks ranges and reports the first offending field.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, AtlasResult};

/// Top-level configuration for CodeAtlas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding backend configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Summary backend configuration.
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Indexing configuration.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Persistent store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file. Defaults to the per-user data dir.
    #[serde(default = "StoreConfig::default_db_path")]
    pub db_path: PathBuf,

    /// Connection pool size. SQLite allows one writer; extra connections
    /// serve future read pooling.
    #[serde(default = "StoreConfig::default_pool_size")]
    pub pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: Self::default_db_path(),
            pool_size: Self::default_pool_size(),
        }
    }
}

impl StoreConfig {
    fn default_db_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codeatlas")
            .join("atlas.db")
    }

    fn default_pool_size() -> usize { 4 }
}

/// Embedding backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service.
    #[serde(default = "EmbeddingConfig::default_host")]
    pub host: String,

    /// Model identifier sent to the backend.
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,

    /// Output embedding dimension. Every vector in the store must match.
    #[serde(default = "EmbeddingConfig::default_dimension")]
    pub dimension: usize,

    /// Batch size for outbound embedding calls.
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,

    /// Retries for transient backend errors.
    #[serde(default = "EmbeddingConfig::default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry.
    #[serde(default = "EmbeddingConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Per-call timeout in seconds.
    #[serde(default = "EmbeddingConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Embedding-cache entry time-to-live in seconds.
    #[serde(default = "EmbeddingConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Embedding-cache capacity bound.
    #[serde(default = "EmbeddingConfig::default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            model: Self::default_model(),
            dimension: Self::default_dimension(),
            batch_size: Self::default_batch_size(),
            max_retries: Self::default_max_retries(),
            retry_base_ms: Self::default_retry_base_ms(),
            timeout_secs: Self::default_timeout_secs(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
            cache_capacity: Self::default_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    fn default_host() -> String { "http://localhost:11434".into() }
    fn default_model() -> String { "mxbai-embed-large".into() }
    fn default_dimension() -> usize { 1024 }
    fn default_batch_size() -> usize { 32 }
    fn default_max_retries() -> u32 { 3 }
    fn default_retry_base_ms() -> u64 { 250 }
    fn default_timeout_secs() -> u64 { 30 }
    fn default_cache_ttl_secs() -> u64 { 300 }
    fn default_cache_capacity() -> usize { 4096 }
}

/// Summary backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Base URL of the LLM service. Empty disables the LLM path entirely.
    #[serde(default = "SummaryConfig::default_host")]
    pub host: String,

    /// Model identifier for summaries.
    #[serde(default = "SummaryConfig::default_model")]
    pub model: String,

    /// Lines from the head of the file passed to the summarizer.
    #[serde(default = "SummaryConfig::default_head_lines")]
    pub head_lines: usize,

    /// Per-call timeout in seconds.
    #[serde(default = "SummaryConfig::default_timeout_secs")]
    pub timeout_secs: u64,

    /// Preferred method: `llm` or `rule-based`.
    #[serde(default = "SummaryConfig::default_method")]
    pub method: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            model: Self::default_model(),
            head_lines: Self::default_head_lines(),
            timeout_secs: Self::default_timeout_secs(),
            method: Self::default_method(),
        }
    }
}

impl SummaryConfig {
    fn default_host() -> String { String::new() }
    fn default_model() -> String { "llama3.1".into() }
    fn default_head_lines() -> usize { 100 }
    fn default_timeout_secs() -> u64 { 20 }
    fn default_method() -> String { "llm".into() }
}

/// Indexing-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Whether to honor repository ignore files.
    #[serde(default = "IndexingConfig::default_true")]
    pub respect_ignore_file: bool,

    /// Files over this many lines are skipped outright.
    #[serde(default = "IndexingConfig::default_max_file_lines")]
    pub max_file_lines: u32,

    /// Whether documentation formats (markdown, text) are indexed.
    #[serde(default)]
    pub include_docs: bool,

    /// Path globs excluded as secrets (matched against the relative path).
    #[serde(default = "IndexingConfig::default_secret_patterns")]
    pub secret_patterns: Vec<String>,

    /// Optional allowlist of language tags; empty keeps every recognized one.
    #[serde(default)]
    pub languages_allowlist: Vec<String>,

    /// Files over this many lines take the structure-only path.
    #[serde(default = "IndexingConfig::default_large_file_lines")]
    pub large_file_lines: u32,

    /// Minimum lines for a standalone top-level block chunk.
    #[serde(default = "IndexingConfig::default_chunk_min_lines")]
    pub chunk_min_lines: u32,

    /// Maximum lines of a merged block chunk.
    #[serde(default = "IndexingConfig::default_chunk_max_lines")]
    pub chunk_max_lines: u32,

    /// Window size for fallback chunking, in lines.
    #[serde(default = "IndexingConfig::default_fallback_window_lines")]
    pub fallback_window_lines: u32,

    /// Symbol definition text is truncated at this many bytes.
    #[serde(default = "IndexingConfig::default_max_symbol_def_bytes")]
    pub max_symbol_def_bytes: usize,

    /// File worker pool size. 0 means `min(8, available CPUs)`.
    #[serde(default)]
    pub file_workers: usize,

    /// Embedding worker pool size.
    #[serde(default = "IndexingConfig::default_embed_workers")]
    pub embed_workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            respect_ignore_file: true,
            max_file_lines: Self::default_max_file_lines(),
            include_docs: false,
            secret_patterns: Self::default_secret_patterns(),
            languages_allowlist: Vec::new(),
            large_file_lines: Self::default_large_file_lines(),
            chunk_min_lines: Self::default_chunk_min_lines(),
            chunk_max_lines: Self::default_chunk_max_lines(),
            fallback_window_lines: Self::default_fallback_window_lines(),
            max_symbol_def_bytes: Self::default_max_symbol_def_bytes(),
            file_workers: 0,
            embed_workers: Self::default_embed_workers(),
        }
    }
}

impl IndexingConfig {
    fn default_true() -> bool { true }
    fn default_max_file_lines() -> u32 { 10_000 }
    fn default_large_file_lines() -> u32 { 5_000 }
    fn default_chunk_min_lines() -> u32 { 10 }
    fn default_chunk_max_lines() -> u32 { 150 }
    fn default_fallback_window_lines() -> u32 { 60 }
    fn default_max_symbol_def_bytes() -> usize { 1_200 }
    fn default_embed_workers() -> usize { 4 }

    fn default_secret_patterns() -> Vec<String> {
        vec![
            "**/.env*".into(),
            "**/*.pem".into(),
            "**/*.key".into(),
            "**/id_rsa*".into(),
            "**/credentials*".into(),
            "**/secrets*".into(),
        ]
    }

    /// Effective file worker pool size.
    pub fn effective_file_workers(&self) -> usize {
        if self.file_workers > 0 {
            self.file_workers
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
                .min(8)
        }
    }
}

/// Retrieval-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum file-level hits.
    #[serde(default = "RetrievalConfig::default_max_files")]
    pub max_files: usize,

    /// Maximum chunk-level hits.
    #[serde(default = "RetrievalConfig::default_max_snippets")]
    pub max_snippets: usize,

    /// File-level similarity floor.
    #[serde(default = "RetrievalConfig::default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Chunk-level similarity floor.
    #[serde(default = "RetrievalConfig::default_chunk_similarity_threshold")]
    pub chunk_similarity_threshold: f32,

    /// Near-duplicate cosine threshold.
    #[serde(default = "RetrievalConfig::default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Import expansion depth cap.
    #[serde(default = "RetrievalConfig::default_import_depth")]
    pub import_depth: u32,

    /// Symbol usage cap.
    #[serde(default = "RetrievalConfig::default_max_usages")]
    pub max_usages: usize,

    /// Token count above which a `context_size` warning is emitted.
    #[serde(default = "RetrievalConfig::default_warn_context_tokens")]
    pub warn_context_tokens: u64,

    /// Reference repos older than this many days draw an
    /// `outdated_reference` warning.
    #[serde(default = "RetrievalConfig::default_reference_stale_days")]
    pub reference_stale_days: u32,

    /// Hybrid keyword+vector search toggle. Accepted but not wired into
    /// the retrieval stages.
    #[serde(default)]
    pub hybrid_search: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_files: Self::default_max_files(),
            max_snippets: Self::default_max_snippets(),
            similarity_threshold: Self::default_similarity_threshold(),
            chunk_similarity_threshold: Self::default_chunk_similarity_threshold(),
            dedup_threshold: Self::default_dedup_threshold(),
            import_depth: Self::default_import_depth(),
            max_usages: Self::default_max_usages(),
            warn_context_tokens: Self::default_warn_context_tokens(),
            reference_stale_days: Self::default_reference_stale_days(),
            hybrid_search: false,
        }
    }
}

impl RetrievalConfig {
    fn default_max_files() -> usize { 15 }
    fn default_max_snippets() -> usize { 25 }
    fn default_similarity_threshold() -> f32 { 0.3 }
    fn default_chunk_similarity_threshold() -> f32 { 0.2 }
    fn default_dedup_threshold() -> f32 { 0.92 }
    fn default_import_depth() -> u32 { 3 }
    fn default_max_usages() -> usize { 50 }
    fn default_warn_context_tokens() -> u64 { 100_000 }
    fn default_reference_stale_days() -> u32 { 90 }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: Self::default_level(), json: false }
    }
}

impl LoggingConfig {
    fn default_level() -> String { "info".into() }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            summary: SummaryConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, then overlay user config, project
    /// config, and environment variables.
    pub fn load(project_root: Option<&Path>) -> AtlasResult<Self> {
        let mut config = Self::default();

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("codeatlas").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        if let Some(root) = project_root {
            let project_config_path = root.join(".codeatlas").join("config.toml");
            if project_config_path.exists() {
                config.merge_from_file(&project_config_path)?;
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> AtlasResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| AtlasError::Config {
            field: path.display().to_string(),
            details: format!("invalid TOML: {e}"),
        })?;

        macro_rules! overlay_section {
            ($key:literal, $field:ident, $ty:ty) => {
                if let Some(section) = overlay.get($key) {
                    if let Ok(parsed) = section.clone().try_into::<$ty>() {
                        self.$field = parsed;
                    }
                }
            };
        }

        overlay_section!("store", store, StoreConfig);
        overlay_section!("embedding", embedding, EmbeddingConfig);
        overlay_section!("summary", summary, SummaryConfig);
        overlay_section!("indexing", indexing, IndexingConfig);
        overlay_section!("retrieval", retrieval, RetrievalConfig);
        overlay_section!("logging", logging, LoggingConfig);

        Ok(())
    }

    /// Apply environment variable overrides (`ATLAS_*` prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ATLAS_DB_PATH") {
            self.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATLAS_EMBEDDER_URL") {
            self.embedding.host = v;
        }
        if let Ok(v) = std::env::var("ATLAS_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("ATLAS_EMBED_DIM") {
            if let Ok(dim) = v.parse() {
                self.embedding.dimension = dim;
            }
        }
        if let Ok(v) = std::env::var("ATLAS_SUMMARY_URL") {
            self.summary.host = v;
        }
        if let Ok(v) = std::env::var("ATLAS_SUMMARY_MODEL") {
            self.summary.model = v;
        }
        if let Ok(v) = std::env::var("ATLAS_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Validate ranges. Returns the first offending field.
    pub fn validate(&self) -> AtlasResult<()> {
        fn bad(field: &str, details: impl Into<String>) -> AtlasError {
            AtlasError::Config { field: field.into(), details: details.into() }
        }

        if self.embedding.dimension == 0 {
            return Err(bad("embedding.dimension", "must be positive"));
        }
        if self.embedding.batch_size == 0 {
            return Err(bad("embedding.batch_size", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return Err(bad("retrieval.similarity_threshold", "must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.chunk_similarity_threshold) {
            return Err(bad("retrieval.chunk_similarity_threshold", "must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_threshold) {
            return Err(bad("retrieval.dedup_threshold", "must be within 0..=1"));
        }
        if self.retrieval.max_files == 0 || self.retrieval.max_files > 50 {
            return Err(bad("retrieval.max_files", "must be within 1..=50"));
        }
        if self.retrieval.max_snippets == 0 || self.retrieval.max_snippets > 100 {
            return Err(bad("retrieval.max_snippets", "must be within 1..=100"));
        }
        if self.retrieval.import_depth == 0 || self.retrieval.import_depth > 3 {
            return Err(bad("retrieval.import_depth", "must be within 1..=3"));
        }
        if self.retrieval.max_usages == 0 || self.retrieval.max_usages > 100 {
            return Err(bad("retrieval.max_usages", "must be within 1..=100"));
        }
        if self.indexing.chunk_min_lines == 0
            || self.indexing.chunk_min_lines >= self.indexing.chunk_max_lines
        {
            return Err(bad("indexing.chunk_min_lines", "must be positive and below chunk_max_lines"));
        }
        if self.indexing.max_file_lines < 100 {
            return Err(bad("indexing.max_file_lines", "must be at least 100"));
        }
        if self.summary.method != "llm" && self.summary.method != "rule-based" {
            return Err(bad("summary.method", "must be `llm` or `rule-based`"));
        }
        Ok(())
    }
}
