//! Error types for supplyline-store

use thiserror::Error;

/// Errors that can occur while talking to object storage
#[derive(Error, Debug)]
pub enum StoreError {
    /// Credentials missing from the environment
    #[error("object store is not configured: {0}")]
    NotConfigured(String),

    /// Bucket or key rejected before any request was made
    #[error("invalid object location: {0}")]
    InvalidLocation(String),

    /// The backend rejected or failed the request
    #[error("upload of {key} to bucket {bucket} failed: {reason}")]
    UploadFailed {
        bucket: String,
        key: String,
        reason: String,
    },

    /// IO error reading the artifact
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
