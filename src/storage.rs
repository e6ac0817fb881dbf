//! Object-store operations: board buckets and uploads.

use edu_rag_core::backend::ObjectStore;
use edu_rag_core::models::{LogicalCoordinate, ObjectLocation};
use edu_rag_core::{codec, BackendError, Error, Result};

use crate::retry::{with_retry, RetryPolicy};

/// Create the bucket for a board. An existing bucket is not an error.
pub async fn create_bucket(store: &dyn ObjectStore, board: &str, retry: &RetryPolicy) -> Result<String> {
    let bucket = codec::bucket_for(board)?;
    match with_retry(retry, "create_container", || store.create_container(&bucket)).await {
        Ok(()) => {}
        Err(BackendError::AlreadyExists(_)) => {
            tracing::debug!(bucket = %bucket, "bucket already exists");
        }
        Err(source) => {
            return Err(Error::BackendUnavailable {
                operation: "create_container",
                target: bucket,
                source,
            })
        }
    }
    Ok(bucket)
}

/// Upload bytes to the canonical location for `coordinate` + `filename`.
pub async fn upload_file(
    store: &dyn ObjectStore,
    coordinate: &LogicalCoordinate,
    filename: &str,
    bytes: Vec<u8>,
    retry: &RetryPolicy,
) -> Result<ObjectLocation> {
    let location = codec::encode_location(coordinate, filename)?;
    let key = location.key();
    with_retry(retry, "put_object", || {
        store.put_object(&location.bucket, &key, bytes.clone())
    })
    .await
    .map_err(|source| Error::BackendUnavailable {
        operation: "put_object",
        target: location.uri(),
        source,
    })?;
    tracing::info!(uri = %location, size = bytes.len(), "uploaded file");
    Ok(location)
}
