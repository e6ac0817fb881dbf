//! Importing object-store files into their coordinate's corpus.
//!
//! # Workflow
//!
//! 1. Decode the location to a coordinate (no backend call on failure).
//! 2. Take the per-corpus lock so concurrent first imports create the
//!    corpus once.
//! 3. Resolve the corpus handle from the catalog, or create the corpus in
//!    the backend (tolerating "already exists" by listing).
//! 4. Ask the backend to ingest the object.
//! 5. Record the provenance link in the catalog.
//!
//! Any failure in 3 or 4 leaves the catalog unchanged. Removing a file or
//! a corpus follows the same order: backend first, catalog second.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use edu_rag_core::backend::{ImportOptions, IndexBackend};
use edu_rag_core::catalog::Catalog;
use edu_rag_core::codec;
use edu_rag_core::error::CoordinateField;
use edu_rag_core::models::{CorpusId, CorpusRecord, ImportRecord, LogicalCoordinate, ObjectLocation};
use edu_rag_core::{BackendError, Error, Result};

use crate::retry::{with_retry, RetryPolicy};

/// One async mutex per corpus id.
#[derive(Default)]
struct CorpusLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CorpusLocks {
    async fn acquire(&self, corpus_id: &CorpusId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(corpus_id.as_str().to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Unlock and forget the lock of a deleted corpus, unless another task
    /// already holds a handle to it.
    fn release(&self, corpus_id: &CorpusId, guard: OwnedMutexGuard<()>) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // One count for the map entry, one for `guard`.
        let idle = map
            .get(corpus_id.as_str())
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            map.remove(corpus_id.as_str());
        }
        drop(guard);
    }
}

pub struct Importer {
    catalog: Arc<Catalog>,
    index: Arc<dyn IndexBackend>,
    retry: RetryPolicy,
    locks: CorpusLocks,
}

impl Importer {
    pub fn new(catalog: Arc<Catalog>, index: Arc<dyn IndexBackend>, retry: RetryPolicy) -> Self {
        Self {
            catalog,
            index,
            retry,
            locks: CorpusLocks::default(),
        }
    }

    /// Import one object into the corpus for its coordinate.
    pub async fn import_file(
        &self,
        location: &ObjectLocation,
        options: &ImportOptions,
    ) -> Result<ImportRecord> {
        let coordinate = codec::decode_location(location).map_err(|e| Error::InvalidCoordinate {
            field: CoordinateField::Location,
            value: location.uri(),
            reason: match e {
                Error::UnparseableLocation { reason, .. } => reason,
                other => other.to_string(),
            },
            suggestion: None,
        })?;
        options.validate()?;

        let corpus_id = codec::encode_corpus_id(&coordinate);
        let uri = location.uri();
        let _guard = self.locks.acquire(&corpus_id).await;

        let corpus_ref = match self.catalog.corpus_ref(corpus_id.as_str()) {
            Some(r) => r,
            None => {
                self.create_in_backend(&corpus_id, &coordinate.display_name())
                    .await?
            }
        };

        let file_ref = with_retry(&self.retry, "import_object", || {
            self.index.import_object(&corpus_ref, &uri, options)
        })
        .await
        .map_err(|e| match e {
            BackendError::Rejected(reason) => Error::IngestionRejected {
                location: uri.clone(),
                reason,
            },
            other => Error::BackendUnavailable {
                operation: "import_object",
                target: uri.clone(),
                source: other,
            },
        })?;

        let record = self.catalog.register_import(location, &file_ref, &corpus_ref)?;
        tracing::info!(corpus = %corpus_id, uri = %uri, file_ref = %file_ref, "imported file");
        Ok(record)
    }

    /// Create (or adopt) the corpus for a coordinate without importing.
    pub async fn create_corpus(
        &self,
        coordinate: &LogicalCoordinate,
        description: Option<&str>,
    ) -> Result<CorpusRecord> {
        let corpus_id = codec::encode_corpus_id(coordinate);
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| coordinate.display_name());
        let _guard = self.locks.acquire(&corpus_id).await;

        if let Some(existing) = self.catalog.corpus_ref(corpus_id.as_str()) {
            tracing::debug!(corpus = %corpus_id, corpus_ref = %existing, "corpus already registered");
            return self.catalog.record_for(corpus_id.as_str());
        }
        let corpus_ref = self.create_in_backend(&corpus_id, &description).await?;
        Ok(self.catalog.ensure_corpus(coordinate, &description, &corpus_ref))
    }

    /// Delete a corpus in the backend, then purge it from the catalog.
    pub async fn delete_corpus(&self, corpus_id: &str) -> Result<CorpusRecord> {
        let record = self.catalog.record_for(corpus_id)?;
        let guard = self.locks.acquire(&record.id).await;

        let outcome = with_retry(&self.retry, "delete_corpus", || {
            self.index.delete_corpus(&record.backend_ref)
        })
        .await;
        match outcome {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                tracing::warn!(corpus = corpus_id, "corpus already gone from backend");
            }
            Err(e) => {
                return Err(Error::BackendUnavailable {
                    operation: "delete_corpus",
                    target: corpus_id.to_string(),
                    source: e,
                })
            }
        }
        let removed = self.catalog.remove_corpus(corpus_id);
        self.locks.release(&record.id, guard);
        removed
    }

    /// Remove one imported file from its corpus, in the backend and then
    /// in the catalog. The corpus itself stays.
    pub async fn remove_file(&self, corpus_id: &str, location: &ObjectLocation) -> Result<ImportRecord> {
        let id = self.catalog.record_for(corpus_id)?.id;
        let _guard = self.locks.acquire(&id).await;

        let record = self.catalog.record_for(corpus_id)?;
        let import = record
            .members
            .get(location)
            .cloned()
            .ok_or_else(|| Error::UnknownFile {
                corpus_id: corpus_id.to_string(),
                location: location.uri(),
            })?;

        let outcome = with_retry(&self.retry, "delete_file", || {
            self.index
                .delete_file(&record.backend_ref, &import.backend_file_ref)
        })
        .await;
        match outcome {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                tracing::warn!(corpus = corpus_id, uri = %location, "file already gone from backend");
            }
            Err(e) => {
                return Err(Error::BackendUnavailable {
                    operation: "delete_file",
                    target: location.uri(),
                    source: e,
                })
            }
        }
        self.catalog.remove_import(corpus_id, location)?;
        tracing::info!(corpus = corpus_id, uri = %location, "removed file");
        Ok(import)
    }

    /// Create the corpus in the backend, resolving name clashes by listing.
    async fn create_in_backend(&self, corpus_id: &CorpusId, description: &str) -> Result<String> {
        let created = with_retry(&self.retry, "create_corpus", || {
            self.index.create_corpus(corpus_id.as_str(), description)
        })
        .await;

        match created {
            Ok(corpus_ref) => {
                tracing::info!(corpus = %corpus_id, corpus_ref = %corpus_ref, "created corpus");
                Ok(corpus_ref)
            }
            Err(BackendError::AlreadyExists(_)) => self.find_in_backend(corpus_id).await,
            Err(e) => Err(Error::BackendUnavailable {
                operation: "create_corpus",
                target: corpus_id.to_string(),
                source: e,
            }),
        }
    }

    async fn find_in_backend(&self, corpus_id: &CorpusId) -> Result<String> {
        let unavailable = |source| Error::BackendUnavailable {
            operation: "list_corpora",
            target: corpus_id.to_string(),
            source,
        };
        let corpora = with_retry(&self.retry, "list_corpora", || self.index.list_corpora())
            .await
            .map_err(unavailable)?;
        corpora
            .into_iter()
            .find(|c| c.name == corpus_id.as_str())
            .map(|c| c.corpus_ref)
            .ok_or_else(|| {
                unavailable(BackendError::NotFound(format!(
                    "backend reported {corpus_id} as existing but does not list it"
                )))
            })
    }
}
