//! supplyline-store: artifact uploads to object storage
//!
//! The pipeline persists `sbom.json` and `vuln.json` into an operator-named
//! bucket when one is configured. This crate owns that concern: the
//! [`ObjectStore`] trait, an S3-compatible implementation, and an in-memory
//! fake for tests.

pub mod error;
pub mod fakes;
pub mod s3;

use async_trait::async_trait;
use std::path::Path;

pub use error::StoreError;
pub use s3::{S3Config, S3ObjectStore};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Put-only object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` in `bucket`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Upload a local file, keyed by `key`.
pub async fn upload_file(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    path: &Path,
) -> Result<()> {
    let bytes = tokio::fs::read(path).await?;
    store.put(bucket, key, bytes).await
}

/// Reject empty buckets and keys before a request is made.
pub(crate) fn validate_location(bucket: &str, key: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(StoreError::InvalidLocation("bucket name is empty".to_string()));
    }
    if key.trim().is_empty() || key.starts_with('/') {
        return Err(StoreError::InvalidLocation(format!("invalid key {key:?}")));
    }
    Ok(())
}
