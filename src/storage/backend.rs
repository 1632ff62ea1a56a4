// src/storage/backend.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{ClientOptions, ObjectStore};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REGION: &str = "us-east-1";
const PRESIGN_EXPIRY: Duration = Duration::from_secs(300);

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Storage section of the agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub backend: StorageBackend,

    /// Upper bound for every remote call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum StorageBackend {
    /// AWS S3 or any S3-compatible endpoint (MinIO, Ceph, ...)
    S3 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aws_access_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aws_secret_key: Option<String>,
        #[serde(alias = "bucketName")]
        bucket_name: String,
    },

    /// A directory on the local disk acting as the bucket
    Local { path: PathBuf },

    /// Process-local storage, gone at exit
    Memory,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Local { path: path.into() },
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Name of the container the handle is bound to.
    pub fn container_name(&self) -> String {
        match &self.backend {
            StorageBackend::S3 { bucket_name, .. } => bucket_name.clone(),
            StorageBackend::Local { path } => path.display().to_string(),
            StorageBackend::Memory => "memory".to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(AgentError::Config(
                "storage.timeout_secs must be greater than zero".to_string(),
            ));
        }
        match &self.backend {
            StorageBackend::S3 {
                url, bucket_name, ..
            } => {
                if bucket_name.trim().is_empty() {
                    return Err(AgentError::Config(
                        "storage.bucket_name must not be empty".to_string(),
                    ));
                }
                if let Some(endpoint) = url {
                    let parsed = url::Url::parse(endpoint).map_err(|e| {
                        AgentError::Config(format!("invalid storage url '{}': {}", endpoint, e))
                    })?;
                    if !matches!(parsed.scheme(), "http" | "https") {
                        return Err(AgentError::Config(format!(
                            "storage url '{}' must use http or https",
                            endpoint
                        )));
                    }
                }
            }
            StorageBackend::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(AgentError::Config(
                        "storage.path must not be empty".to_string(),
                    ));
                }
            }
            StorageBackend::Memory => {}
        }
        Ok(())
    }

    /// Same configuration with credentials masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let StorageBackend::S3 {
            aws_access_key,
            aws_secret_key,
            ..
        } = &mut copy.backend
        {
            for secret in [aws_access_key, aws_secret_key] {
                if secret.is_some() {
                    *secret = Some("******".to_string());
                }
            }
        }
        copy
    }
}

/// Dial the configured provider and make sure its container is usable.
pub(crate) async fn connect(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match &config.backend {
        StorageBackend::Memory => Arc::new(InMemory::new()),

        StorageBackend::Local { path } => {
            if !path.exists() {
                info!(path = %path.display(), "container not found, creating it");
            }
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| AgentError::local_file(path, e))?;
            Arc::new(
                LocalFileSystem::new_with_prefix(path)
                    .map_err(|e| AgentError::Config(e.to_string()))?,
            )
        }

        StorageBackend::S3 {
            url,
            region,
            aws_access_key,
            aws_secret_key,
            bucket_name,
        } => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket_name)
                .with_region(region.as_deref().unwrap_or(DEFAULT_REGION))
                .with_client_options(ClientOptions::new().with_timeout(config.timeout()));
            if let Some(key) = aws_access_key {
                builder = builder.with_access_key_id(key);
            }
            if let Some(secret) = aws_secret_key {
                builder = builder.with_secret_access_key(secret);
            }
            if let Some(endpoint) = url {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
            }

            let s3 = builder
                .build()
                .map_err(|e| AgentError::Config(e.to_string()))?;
            let region = region.as_deref().unwrap_or(DEFAULT_REGION);
            if !bucket_exists(&s3, bucket_name, config.timeout()).await? {
                info!(bucket = %bucket_name, "container not found, creating it");
                create_bucket(&s3, bucket_name, region, config.timeout()).await?;
            }
            Arc::new(s3)
        }
    };

    debug!(container = %config.container_name(), "storage backend ready");
    Ok(store)
}

/// List the bucket root; `false` when the provider says the bucket is missing.
async fn bucket_exists(s3: &AmazonS3, bucket: &str, timeout: Duration) -> Result<bool> {
    let root = ObjectPath::from("");
    let mut stream = s3.list(Some(&root));
    match tokio::time::timeout(timeout, stream.try_next()).await {
        Ok(Ok(_)) => Ok(true),
        Ok(Err(e)) if is_missing_bucket(&e) => Ok(false),
        Ok(Err(e)) => Err(AgentError::Backend(e)),
        Err(_) => Err(AgentError::Timeout {
            operation: format!("listing bucket {}", bucket),
            after: timeout,
        }),
    }
}

fn is_missing_bucket(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::NotFound { .. }) || err.to_string().contains("NoSuchBucket")
}

/// CreateBucket request body; us-east-1 takes none.
fn create_bucket_body(region: &str) -> String {
    if region == DEFAULT_REGION {
        return String::new();
    }
    format!(
        "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
         <LocationConstraint>{}</LocationConstraint>\
         </CreateBucketConfiguration>",
        region
    )
}

/// Create `bucket` with a presigned `PUT` on the bucket root. A bucket we
/// already own counts as created.
async fn create_bucket(s3: &AmazonS3, bucket: &str, region: &str, timeout: Duration) -> Result<()> {
    let failed = |reason: String| AgentError::BucketCreation {
        bucket: bucket.to_string(),
        reason,
    };

    let url = s3
        .signed_url(Method::PUT, &ObjectPath::from(""), PRESIGN_EXPIRY)
        .await
        .map_err(|e| failed(e.to_string()))?;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client
        .put(url)
        .body(create_bucket_body(region))
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success()
        || (status == StatusCode::CONFLICT && body.contains("BucketAlreadyOwnedByYou"))
    {
        info!(bucket, region, "bucket created");
        return Ok(());
    }
    Err(failed(format!("{}: {}", status, body.trim())))
}
