//! S3-compatible object store client
//!
//! Credentials come from the environment once, when the client is built, and
//! are reused for every upload of the run.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::fmt;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::{validate_location, ObjectStore, Result};

/// Access key environment variable
pub const ACCESS_KEY_ENV: &str = "S3_ACCESS_KEY_ID";
/// Secret key environment variable
pub const SECRET_KEY_ENV: &str = "S3_SECRET_ACCESS_KEY";
/// Endpoint environment variable
pub const ENDPOINT_ENV: &str = "S3_API_ENDPOINT";

const DEFAULT_REGION: &str = "us-east-1";

/// S3 connection settings
#[derive(Clone)]
pub struct S3Config {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Custom endpoint (MinIO, R2, ...); AWS when unset
    pub endpoint: Option<String>,
    /// Signing region
    pub region: String,
    /// Path-style addressing (`endpoint/bucket/key`)
    pub force_path_style: bool,
}

impl S3Config {
    /// Create config for explicit credentials
    pub fn new(access_key_id: &str, secret_access_key: &str) -> Self {
        S3Config {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            force_path_style: true,
        }
    }

    /// Set a custom endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        if !endpoint.is_empty() {
            self.endpoint = Some(endpoint.to_string());
        }
        self
    }

    /// Read credentials from the environment.
    ///
    /// Returns `None` unless both the access key and secret key are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let access = lookup(ACCESS_KEY_ENV).filter(|v| !v.is_empty())?;
        let secret = lookup(SECRET_KEY_ENV).filter(|v| !v.is_empty())?;
        let endpoint = lookup(ENDPOINT_ENV).unwrap_or_default();
        Some(S3Config::new(&access, &secret).with_endpoint(&endpoint))
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Object store backed by an S3-compatible service
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from explicit settings
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "supplyline-env",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(config.force_path_style)
            .build();
        debug!(endpoint = ?config.endpoint, region = %config.region, "configured S3 client");

        S3ObjectStore {
            client: Client::from_conf(s3_config),
        }
    }

    /// Build a client from environment credentials
    pub async fn from_env() -> Result<Self> {
        let config = S3Config::from_env().ok_or_else(|| {
            StoreError::NotConfigured(format!("{ACCESS_KEY_ENV} and {SECRET_KEY_ENV} must be set"))
        })?;
        Ok(Self::connect(&config).await)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        validate_location(bucket, key)?;
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| StoreError::UploadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        info!(bucket = %bucket, key = %key, bytes = size, "uploaded object");
        Ok(())
    }
}
