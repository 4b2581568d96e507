//! Artifact upload destination shared by the SBOM and scan stages.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use supplyline_store::{upload_file, ObjectStore, StoreError};

/// Bucket plus the client that writes to it. Present only when the operator
/// configured an object store for the run.
#[derive(Clone)]
pub struct ArtifactUpload {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ArtifactUpload {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Upload `path` under `key`, returning the key on success.
    pub async fn put_file(&self, key: &str, path: &Path) -> Result<String, StoreError> {
        upload_file(self.store.as_ref(), &self.bucket, key, path).await?;
        debug!(bucket = %self.bucket, key, "artifact uploaded");
        Ok(key.to_string())
    }
}

impl fmt::Debug for ArtifactUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactUpload")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
