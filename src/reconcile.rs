//! Rebuilding the catalog from the indexing backend, and drift checks
//! against the object store.
//!
//! The catalog lives in memory, so every CLI invocation starts by listing
//! corpora and their files. Corpora whose names are not corpus ids, and
//! files that do not belong to their corpus's coordinate, are skipped and
//! reported.

use chrono::Utc;
use serde::Serialize;

use edu_rag_core::backend::{IndexBackend, ObjectStore};
use edu_rag_core::catalog::{Catalog, DriftReport};
use edu_rag_core::codec;
use edu_rag_core::models::CorpusId;
use edu_rag_core::{Error, Result};

use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub corpora: usize,
    pub imports: usize,
    /// Backend corpora whose names are not corpus ids.
    pub skipped_corpora: Vec<String>,
    /// File URIs that do not decode into their corpus's coordinate.
    pub foreign_files: Vec<String>,
}

pub async fn rebuild_catalog(
    catalog: &Catalog,
    index: &dyn IndexBackend,
    retry: &RetryPolicy,
) -> Result<ReconcileReport> {
    let corpora = with_retry(retry, "list_corpora", || index.list_corpora())
        .await
        .map_err(|source| Error::BackendUnavailable {
            operation: "list_corpora",
            target: "index".to_string(),
            source,
        })?;

    let mut report = ReconcileReport::default();
    for corpus in corpora {
        let id = match CorpusId::parse(&corpus.name) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(name = %corpus.name, error = %e, "skipping foreign corpus");
                report.skipped_corpora.push(corpus.name);
                continue;
            }
        };
        catalog.ensure_corpus(id.coordinate(), &corpus.description, &corpus.corpus_ref);
        report.corpora += 1;

        let files = with_retry(retry, "list_files", || index.list_files(&corpus.corpus_ref))
            .await
            .map_err(|source| Error::BackendUnavailable {
                operation: "list_files",
                target: id.to_string(),
                source,
            })?;
        for file in files {
            let (base, _) = codec::split_page_fragment(&file.uri);
            let belongs = codec::parse_location_uri(base)
                .ok()
                .filter(|location| {
                    codec::decode_location(location)
                        .is_ok_and(|coordinate| &coordinate == id.coordinate())
                });
            match belongs {
                Some(location) => {
                    catalog.register_import_at(
                        &location,
                        &file.file_ref,
                        &corpus.corpus_ref,
                        file.imported_at.unwrap_or_else(Utc::now),
                    )?;
                    report.imports += 1;
                }
                None => report.foreign_files.push(file.uri),
            }
        }
    }

    tracing::debug!(
        corpora = report.corpora,
        imports = report.imports,
        skipped = report.skipped_corpora.len(),
        "catalog rebuilt"
    );
    Ok(report)
}

/// Compare a board's bucket listing with the catalog.
pub async fn drift_for_board(
    catalog: &Catalog,
    store: &dyn ObjectStore,
    board: &str,
    retry: &RetryPolicy,
) -> Result<DriftReport> {
    let bucket = codec::bucket_for(board)?;
    let keys = with_retry(retry, "list_objects", || store.list_objects(&bucket, ""))
        .await
        .map_err(|source| Error::BackendUnavailable {
            operation: "list_objects",
            target: bucket.clone(),
            source,
        })?;

    let mut listed = Vec::with_capacity(keys.len());
    let mut unreadable = Vec::new();
    for key in keys {
        match codec::location_from_key(&bucket, &key) {
            Ok(location) => listed.push(location),
            Err(e) => {
                tracing::debug!(bucket = %bucket, key = %key, error = %e, "unreadable object key");
                unreadable.push(key);
            }
        }
    }
    let mut report = catalog.drift(&bucket, &listed);
    report.unreadable_keys = unreadable;
    Ok(report)
}
