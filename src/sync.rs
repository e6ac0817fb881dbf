//! Importing every un-indexed object of a board's bucket.
//!
//! ```text
//! bucket listing ──drift──▶ unindexed ──import_file──▶ catalog
//!                            │ one at a time, progress per object
//!                            └─ rejected objects are collected, not fatal
//! ```
//!
//! Objects outside the curriculum layout are counted and skipped. Any
//! import failure other than a rejection stops the run.

use std::sync::Arc;

use serde::Serialize;

use edu_rag_core::backend::ImportOptions;
use edu_rag_core::catalog::Catalog;
use edu_rag_core::codec;
use edu_rag_core::metadata::FileMetadata;
use edu_rag_core::models::{LogicalCoordinate, ObjectLocation};
use edu_rag_core::{Error, Result};

use crate::backends::Backends;
use crate::commands::Outcome;
use crate::config::ImportConfig;
use crate::importer::Importer;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::reconcile::drift_for_board;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedFile {
    pub uri: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub bucket: String,
    pub imported: Vec<ObjectLocation>,
    pub rejected: Vec<RejectedFile>,
    /// Objects outside the curriculum layout, left alone.
    pub skipped: usize,
}

impl SyncReport {
    pub fn outcome(&self) -> Outcome {
        if self.rejected.is_empty() {
            Outcome::Complete
        } else {
            Outcome::Partial
        }
    }
}

/// Chunking from `[import]`, metadata from the coordinate alone.
fn default_options(config: &ImportConfig, coordinate: &LogicalCoordinate) -> Result<ImportOptions> {
    let options = ImportOptions {
        chunk_size: Some(config.chunk_size),
        chunk_overlap: Some(config.chunk_overlap),
        metadata: FileMetadata::default().to_fields(coordinate),
    };
    options.validate()?;
    Ok(options)
}

pub async fn sync_board(
    backends: &Backends,
    catalog: &Arc<Catalog>,
    config: &ImportConfig,
    retry: &RetryPolicy,
    board: &str,
    reporter: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    let bucket = codec::bucket_for(board)?;
    reporter.report(SyncProgressEvent::Scanning {
        bucket: bucket.clone(),
    });
    let drift = drift_for_board(catalog, backends.object_store.as_ref(), board, retry).await?;

    let importer = Importer::new(Arc::clone(catalog), Arc::clone(&backends.index), retry.clone());
    let mut report = SyncReport {
        bucket: bucket.clone(),
        skipped: drift.undecodable.len() + drift.unreadable_keys.len(),
        ..Default::default()
    };
    let total = drift.unindexed.len() as u64;

    for (n, location) in drift.unindexed.iter().enumerate() {
        let coordinate = codec::decode_location(location)?;
        let options = default_options(config, &coordinate)?;
        match importer.import_file(location, &options).await {
            Ok(_) => report.imported.push(location.clone()),
            Err(Error::IngestionRejected { location: uri, reason }) => {
                tracing::warn!(%uri, %reason, "backend rejected file");
                report.rejected.push(RejectedFile { uri, reason });
            }
            Err(e) => return Err(e),
        }
        reporter.report(SyncProgressEvent::Importing {
            bucket: bucket.clone(),
            done: n as u64 + 1,
            total,
            uri: location.uri(),
        });
    }

    tracing::info!(
        bucket = %bucket,
        imported = report.imported.len(),
        rejected = report.rejected.len(),
        skipped = report.skipped,
        "sync finished"
    );
    Ok(report)
}
