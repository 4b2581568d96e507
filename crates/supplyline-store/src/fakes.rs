//! In-memory object store (testing only)

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::{validate_location, ObjectStore, Result};

/// Objects keyed by `(bucket, key)`; can be told to fail every upload.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    fail_uploads: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every `put` fails with `UploadFailed`.
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            fail_uploads: true,
        }
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// All stored `(bucket, key)` pairs, sorted.
    pub fn keys(&self) -> Vec<(String, String)> {
        let objects = self.objects.lock().unwrap();
        objects.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        validate_location(bucket, key)?;
        if self.fail_uploads {
            return Err(StoreError::UploadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }
}
