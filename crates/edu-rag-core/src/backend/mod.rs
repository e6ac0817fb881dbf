//! Interfaces to the two external collaborators.
//!
//! The object store holds the raw files; the indexing backend holds one
//! flat, independently searchable corpus per coordinate. Both are behind
//! traits so the mapping layer can run against in-memory implementations
//! ([`memory`]) or real services.
//!
//! Implementations must be `Send + Sync`; the router shares one index
//! across concurrently running search tasks.
//!
//! # Operations
//!
//! | Trait | Method | Purpose |
//! |-------|--------|---------|
//! | [`ObjectStore`] | [`create_container`](ObjectStore::create_container) | Create a bucket |
//! | | [`put_object`](ObjectStore::put_object) | Upload bytes under a key |
//! | | [`object_exists`](ObjectStore::object_exists) | Check a key |
//! | | [`list_objects`](ObjectStore::list_objects) | List keys under a prefix |
//! | [`IndexBackend`] | [`create_corpus`](IndexBackend::create_corpus) | Create a named corpus |
//! | | [`import_object`](IndexBackend::import_object) | Ingest one object by URI |
//! | | [`search_corpus`](IndexBackend::search_corpus) | Query one corpus |
//! | | [`list_corpora`](IndexBackend::list_corpora) | Enumerate corpora |
//! | | [`list_files`](IndexBackend::list_files) | Enumerate a corpus's files |
//! | | [`delete_file`](IndexBackend::delete_file) | Drop one file from a corpus |
//! | | [`delete_corpus`](IndexBackend::delete_corpus) | Drop a corpus |

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Error, Result};
use crate::metadata::MetadataFilter;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a container. Fails with [`BackendError::AlreadyExists`] or
    /// succeeds when it is already there.
    async fn create_container(&self, name: &str) -> BackendResult<()>;

    async fn put_object(&self, container: &str, key: &str, bytes: Vec<u8>) -> BackendResult<()>;

    async fn object_exists(&self, container: &str, key: &str) -> BackendResult<bool>;

    /// Keys under `prefix`, ascending.
    async fn list_objects(&self, container: &str, prefix: &str) -> BackendResult<Vec<String>>;
}

/// Ingestion parameters forwarded to the indexing backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportOptions {
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
    pub metadata: BTreeMap<String, String>,
}

impl ImportOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(Error::InvalidMetadata {
                field: "chunk_size".into(),
                reason: "must be positive".into(),
            });
        }
        if let (Some(size), Some(overlap)) = (self.chunk_size, self.chunk_overlap) {
            if overlap >= size {
                return Err(Error::InvalidMetadata {
                    field: "chunk_overlap".into(),
                    reason: format!("{overlap} must be smaller than chunk_size {size}"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Maximum vector distance (`1 - similarity`) of returned hits.
    pub distance_threshold: Option<f64>,
    /// Only files whose import metadata matches.
    #[serde(skip_serializing_if = "MetadataFilter::is_empty")]
    pub metadata_filter: MetadataFilter,
}

/// One raw hit from one corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub snippet: String,
    pub score: f64,
    pub chunk_ref: String,
    /// Source URI, optionally with a `#page=N` fragment.
    pub uri: String,
    /// Metadata the file was imported with, when the backend reports it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCorpus {
    pub corpus_ref: String,
    /// Name given at creation; for corpora created by edu-rag, the corpus id.
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendFile {
    pub file_ref: String,
    pub uri: String,
    #[serde(default)]
    pub imported_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Returns the backend handle of the new corpus. May either succeed
    /// idempotently or fail with [`BackendError::AlreadyExists`] when the
    /// name is taken.
    async fn create_corpus(&self, name: &str, description: &str) -> BackendResult<String>;

    /// Returns the backend handle of the ingested file.
    async fn import_object(
        &self,
        corpus_ref: &str,
        uri: &str,
        options: &ImportOptions,
    ) -> BackendResult<String>;

    async fn search_corpus(
        &self,
        corpus_ref: &str,
        query: &str,
        options: &SearchOptions,
    ) -> BackendResult<Vec<Hit>>;

    async fn list_corpora(&self) -> BackendResult<Vec<BackendCorpus>>;

    async fn list_files(&self, corpus_ref: &str) -> BackendResult<Vec<BackendFile>>;

    /// Remove one ingested file, by the handle `import_object` returned.
    async fn delete_file(&self, corpus_ref: &str, file_ref: &str) -> BackendResult<()>;

    async fn delete_corpus(&self, corpus_ref: &str) -> BackendResult<()>;
}
