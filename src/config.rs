//! TOML configuration for `erag`.
//!
//! Every section and field is optional; an empty file gives an in-memory
//! setup suitable for trying the CLI.
//!
//! ```toml
//! [object_store]
//! kind = "s3"                                 # s3 | memory
//! endpoint = "https://storage.googleapis.com"
//! region = "auto"
//! access_key_env = "ERAG_ACCESS_KEY_ID"
//! secret_key_env = "ERAG_SECRET_ACCESS_KEY"
//!
//! [index]
//! kind = "http"                               # http | memory
//! base_url = "http://localhost:8088/v1"
//! api_key_env = "ERAG_INDEX_TOKEN"
//! timeout_secs = 30
//!
//! [import]
//! max_attempts = 4
//! initial_backoff_ms = 500
//! max_backoff_ms = 8000
//! attempt_timeout_secs = 120
//! chunk_size = 512
//! chunk_overlap = 100
//!
//! [search]
//! top_k_per_corpus = 5
//! top_k_single = 10
//! final_limit = 12
//! per_call_timeout_secs = 20
//! distance_threshold = 0.5
//!
//! [logging]
//! filter = "info"                             # RUST_LOG overrides
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreKind {
    S3,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: ObjectStoreKind,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default)]
    pub session_token_env: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            endpoint: default_endpoint(),
            region: default_region(),
            access_key_env: default_access_key_env(),
            secret_key_env: default_secret_key_env(),
            session_token_env: None,
        }
    }
}

fn default_store_kind() -> ObjectStoreKind {
    ObjectStoreKind::Memory
}
fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}
fn default_region() -> String {
    "auto".to_string()
}
fn default_access_key_env() -> String {
    "ERAG_ACCESS_KEY_ID".to_string()
}
fn default_secret_key_env() -> String {
    "ERAG_SECRET_ACCESS_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Http,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_kind")]
    pub kind: IndexKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: default_index_kind(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_kind() -> IndexKind {
    IndexKind::Memory
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_attempt_timeout_secs() -> u64 {
    120
}
fn default_chunk_size() -> u32 {
    512
}
fn default_chunk_overlap() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k_per_corpus")]
    pub top_k_per_corpus: usize,
    #[serde(default = "default_top_k_single")]
    pub top_k_single: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k_per_corpus: default_top_k_per_corpus(),
            top_k_single: default_top_k_single(),
            final_limit: default_final_limit(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            distance_threshold: default_distance_threshold(),
        }
    }
}

fn default_top_k_per_corpus() -> usize {
    5
}
fn default_top_k_single() -> usize {
    10
}
fn default_final_limit() -> usize {
    12
}
fn default_per_call_timeout_secs() -> u64 {
    20
}
fn default_distance_threshold() -> Option<f64> {
    Some(0.5)
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Post-parse checks shared by [`load_config`] and in-process callers.
pub fn validate(config: &Config) -> Result<()> {
    // Validate import
    if config.import.max_attempts == 0 {
        bail!("import.max_attempts must be >= 1");
    }
    if config.import.initial_backoff_ms > config.import.max_backoff_ms {
        bail!("import.initial_backoff_ms must be <= import.max_backoff_ms");
    }
    if config.import.attempt_timeout_secs == 0 {
        bail!("import.attempt_timeout_secs must be > 0");
    }
    if config.import.chunk_size == 0 {
        bail!("import.chunk_size must be > 0");
    }
    if config.import.chunk_overlap >= config.import.chunk_size {
        bail!("import.chunk_overlap must be smaller than import.chunk_size");
    }

    // Validate search
    if config.search.top_k_per_corpus == 0 || config.search.top_k_single == 0 {
        bail!("search.top_k_per_corpus and search.top_k_single must be >= 1");
    }
    if config.search.final_limit == 0 {
        bail!("search.final_limit must be >= 1");
    }
    if config.search.per_call_timeout_secs == 0 {
        bail!("search.per_call_timeout_secs must be > 0");
    }
    if let Some(t) = config.search.distance_threshold {
        if !(0.0..=2.0).contains(&t) {
            bail!("search.distance_threshold must be in [0.0, 2.0]");
        }
    }

    // Validate backends
    if config.index.kind == IndexKind::Http {
        match config.index.base_url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(url) => bail!("index.base_url must be an http(s) URL, got '{}'", url),
            None => bail!("index.base_url is required when index.kind = \"http\""),
        }
    }
    if config.index.kind == IndexKind::Memory && config.object_store.kind != ObjectStoreKind::Memory
    {
        bail!("index.kind = \"memory\" reads objects from memory and requires object_store.kind = \"memory\"");
    }
    if config.index.timeout_secs == 0 {
        bail!("index.timeout_secs must be > 0");
    }
    if config.object_store.kind == ObjectStoreKind::S3
        && !(config.object_store.endpoint.starts_with("http://")
            || config.object_store.endpoint.starts_with("https://"))
    {
        bail!("object_store.endpoint must be an http(s) URL");
    }

    Ok(())
}
