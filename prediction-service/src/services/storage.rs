//! Object storage backends.
//!
//! A backend resolves `bucket` + `key` into a byte stream. The fetcher is
//! responsible for landing that stream on disk.

use crate::config::StorageConfig;
use async_trait::async_trait;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::observability::TracedClientExt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio_util::io::ReaderStream;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Storage error: access denied to {bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Storage error: invalid object name: {0}")]
    InvalidName(String),

    #[error("Storage error: object exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("Storage error: transfer failed: {0}")]
    Transfer(String),

    #[error("Storage error: scratch file: {0}")]
    Scratch(#[from] std::io::Error),
}

impl StorageError {
    /// Failures caused by what the caller asked for rather than by the
    /// service or the storage provider.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. }
                | StorageError::AccessDenied { .. }
                | StorageError::InvalidName(_)
                | StorageError::TooLarge { .. }
        )
    }
}

pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open `bucket/key` for reading.
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError>;

    /// Short backend name used in logs and metrics.
    fn backend(&self) -> &'static str;
}

fn validate_names(bucket: &str, key: &str) -> Result<(), StorageError> {
    if bucket.is_empty() || key.is_empty() {
        return Err(StorageError::InvalidName(
            "bucket and object key must not be empty".to_string(),
        ));
    }
    if bucket.contains('/') {
        return Err(StorageError::InvalidName(format!(
            "bucket name '{}' must not contain '/'",
            bucket
        )));
    }
    if bucket.contains('\0') || key.contains('\0') {
        return Err(StorageError::InvalidName(
            "names must not contain NUL bytes".to_string(),
        ));
    }
    Ok(())
}

/// Filesystem backend: `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).await?;
        }
        Ok(Self { root })
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_names(bucket, key)?;

        let escapes_root = |p: &Path| {
            p.components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        };
        if escapes_root(Path::new(bucket)) || escapes_root(Path::new(key)) {
            return Err(StorageError::InvalidName(format!(
                "'{}/{}' escapes the storage root",
                bucket, key
            )));
        }

        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError> {
        let path = self.object_path(bucket, key)?;

        let not_found = || StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(StorageError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(StorageError::Transfer(e.to_string())),
        };
        if !metadata.is_file() {
            return Err(not_found());
        }

        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => StorageError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => StorageError::Transfer(e.to_string()),
        })?;

        let stream = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(|e| StorageError::Transfer(e.to_string())));
        Ok(Box::pin(stream))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

/// Google Cloud Storage over the JSON API media download endpoint.
pub struct GcsObjectStore {
    client: Client,
    base_url: Url,
    access_token: Option<Secret<String>>,
}

impl GcsObjectStore {
    pub fn new(config: &StorageConfig) -> Result<Self, AppError> {
        let base_url = Url::parse(&config.gcs_base_url).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "GCS_BASE_URL '{}' is not a valid URL: {}",
                config.gcs_base_url,
                e
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "GCS_BASE_URL '{}' cannot be used as a base URL",
                config.gcs_base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            access_token: config.gcs_access_token.clone(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StorageError> {
        validate_names(bucket, key)?;

        let mut url = self.base_url.clone();
        // Each segment is percent-encoded, so a '/' inside the key becomes %2F.
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidName("GCS base URL has no path".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", key]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectStream, StorageError> {
        let url = self.object_url(bucket, key)?;

        tracing::debug!(bucket = %bucket, key = %key, "Requesting object from GCS");

        let response = self
            .client
            .traced_get(url)
            .maybe_bearer_auth(
                self.access_token
                    .as_ref()
                    .map(|token| token.expose_secret().as_str()),
            )
            .send()
            .await
            .map_err(|e| StorageError::Transfer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    StorageError::Transfer(format!("GCS returned {}: {}", status, body))
                }
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::Transfer(e.to_string())));
        Ok(Box::pin(stream))
    }

    fn backend(&self) -> &'static str {
        "gcs"
    }
}
