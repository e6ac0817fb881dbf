//! The catalog: authoritative in-memory registry of corpora and imports.
//!
//! The catalog never talks to a backend. Callers obtain backend handles
//! first and then record them here, so a failed backend call leaves the
//! catalog untouched.
//!
//! # Locking
//!
//! ```text
//! corpora: RwLock<BTreeMap<CorpusId, Arc<RwLock<CorpusRecord>>>>
//!          └─ map lock: taken for read on lookups, for write only when a
//!             corpus is created or removed
//!                                   └─ record lock: taken for writes into
//!                                      one corpus (imports)
//! ```
//!
//! No lock is ever held across an `.await`; all methods are synchronous.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec;
use crate::error::{Error, Result};
use crate::filter::CorpusFilter;
use crate::models::{CorpusId, CorpusRecord, ImportRecord, LogicalCoordinate, ObjectLocation};

type SharedRecord = Arc<RwLock<CorpusRecord>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Differences between an object-store bucket listing and the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftReport {
    pub bucket: String,
    /// Objects in the bucket that no corpus has imported.
    pub unindexed: Vec<ObjectLocation>,
    /// Imports whose object is no longer in the bucket.
    pub missing: Vec<ObjectLocation>,
    /// Objects whose location does not decode to a coordinate.
    pub undecodable: Vec<ObjectLocation>,
    /// Listed keys that are not even well-formed paths (empty segments).
    pub unreadable_keys: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.unindexed.is_empty()
            && self.missing.is_empty()
            && self.undecodable.is_empty()
            && self.unreadable_keys.is_empty()
    }
}

#[derive(Default)]
pub struct Catalog {
    corpora: RwLock<BTreeMap<CorpusId, SharedRecord>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.corpora).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.corpora).is_empty()
    }

    fn shared(&self, corpus_id: &str) -> Option<SharedRecord> {
        read(&self.corpora).get(corpus_id).cloned()
    }

    fn shared_or_insert(
        &self,
        coordinate: &LogicalCoordinate,
        description: impl FnOnce() -> String,
        corpus_ref: &str,
        created_at: DateTime<Utc>,
    ) -> SharedRecord {
        let id = codec::encode_corpus_id(coordinate);
        if let Some(existing) = self.shared(id.as_str()) {
            return existing;
        }
        let mut map = write(&self.corpora);
        map.entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(corpus = %id, "registering corpus");
                Arc::new(RwLock::new(CorpusRecord {
                    id,
                    coordinate: coordinate.clone(),
                    description: description(),
                    backend_ref: corpus_ref.to_string(),
                    created_at,
                    members: BTreeMap::new(),
                }))
            })
            .clone()
    }

    /// Register an (possibly empty) corpus, or refresh the backend handle
    /// and description of an existing one.
    pub fn ensure_corpus(
        &self,
        coordinate: &LogicalCoordinate,
        description: &str,
        corpus_ref: &str,
    ) -> CorpusRecord {
        let shared = self.shared_or_insert(coordinate, || description.to_string(), corpus_ref, Utc::now());
        let mut record = write(&shared);
        record.backend_ref = corpus_ref.to_string();
        if !description.is_empty() {
            record.description = description.to_string();
        }
        record.clone()
    }

    /// Record that `location` was indexed into the corpus behind `corpus_ref`.
    pub fn register_import(
        &self,
        location: &ObjectLocation,
        backend_file_ref: &str,
        corpus_ref: &str,
    ) -> Result<ImportRecord> {
        self.register_import_at(location, backend_file_ref, corpus_ref, Utc::now())
    }

    /// As [`register_import`](Self::register_import) with an explicit
    /// timestamp. Re-registering identical data keeps the stored record.
    pub fn register_import_at(
        &self,
        location: &ObjectLocation,
        backend_file_ref: &str,
        corpus_ref: &str,
        imported_at: DateTime<Utc>,
    ) -> Result<ImportRecord> {
        let coordinate = codec::decode_location(location)?;
        let shared = self.shared_or_insert(
            &coordinate,
            || coordinate.display_name(),
            corpus_ref,
            imported_at,
        );

        let mut record = write(&shared);
        if record.backend_ref != corpus_ref {
            tracing::warn!(
                corpus = %record.id,
                old = %record.backend_ref,
                new = corpus_ref,
                "corpus backend handle changed"
            );
            record.backend_ref = corpus_ref.to_string();
        }
        let entry = record
            .members
            .entry(location.clone())
            .and_modify(|existing| {
                if existing.backend_file_ref != backend_file_ref {
                    existing.backend_file_ref = backend_file_ref.to_string();
                    existing.imported_at = imported_at;
                }
            })
            .or_insert_with(|| ImportRecord {
                source_location: location.clone(),
                imported_at,
                backend_file_ref: backend_file_ref.to_string(),
            });
        Ok(entry.clone())
    }

    /// Corpora matching `filter`, ascending and duplicate-free.
    pub fn corpora_matching(&self, filter: &CorpusFilter) -> Result<Vec<CorpusId>> {
        filter.validate()?;
        Ok(read(&self.corpora)
            .keys()
            .filter(|id| filter.matches(id.coordinate()))
            .cloned()
            .collect())
    }

    pub fn record_for(&self, corpus_id: &str) -> Result<CorpusRecord> {
        self.shared(corpus_id)
            .map(|shared| read(&shared).clone())
            .ok_or_else(|| Error::UnknownCorpus {
                corpus_id: corpus_id.to_string(),
            })
    }

    pub fn corpus_ref(&self, corpus_id: &str) -> Option<String> {
        self.shared(corpus_id)
            .map(|shared| read(&shared).backend_ref.clone())
    }

    pub fn contains(&self, location: &ObjectLocation) -> bool {
        let Ok(coordinate) = codec::decode_location(location) else {
            return false;
        };
        let id = codec::encode_corpus_id(&coordinate);
        self.shared(id.as_str())
            .is_some_and(|shared| read(&shared).members.contains_key(location))
    }

    /// All corpora, ascending by id.
    pub fn records(&self) -> Vec<CorpusRecord> {
        let shared: Vec<SharedRecord> = read(&self.corpora).values().cloned().collect();
        shared.iter().map(|s| read(s).clone()).collect()
    }

    /// Remove a corpus and every import it holds.
    pub fn remove_corpus(&self, corpus_id: &str) -> Result<CorpusRecord> {
        let removed = write(&self.corpora).remove(corpus_id);
        match removed {
            Some(shared) => {
                let record = read(&shared).clone();
                tracing::debug!(corpus = corpus_id, members = record.members.len(), "removed corpus");
                Ok(record)
            }
            None => Err(Error::UnknownCorpus {
                corpus_id: corpus_id.to_string(),
            }),
        }
    }

    /// Forget one imported file. `None` when the corpus never held it.
    pub fn remove_import(&self, corpus_id: &str, location: &ObjectLocation) -> Result<Option<ImportRecord>> {
        let shared = self.shared(corpus_id).ok_or_else(|| Error::UnknownCorpus {
            corpus_id: corpus_id.to_string(),
        })?;
        let removed = write(&shared).members.remove(location);
        Ok(removed)
    }

    /// Compare a complete listing of `bucket` with the imports recorded for it.
    pub fn drift(&self, bucket: &str, listed: &[ObjectLocation]) -> DriftReport {
        let mut report = DriftReport {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let listed_set: BTreeSet<&ObjectLocation> = listed.iter().collect();

        for location in &listed_set {
            if codec::decode_location(location).is_err() {
                report.undecodable.push((*location).clone());
            } else if !self.contains(location) {
                report.unindexed.push((*location).clone());
            }
        }

        for record in self.records() {
            for location in record.members.keys() {
                if location.bucket == bucket && !listed_set.contains(location) {
                    report.missing.push(location.clone());
                }
            }
        }
        report.missing.sort();
        report
    }
}
