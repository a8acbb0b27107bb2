//! Stages a stored object into a per-request scratch file.

use crate::services::storage::{ObjectStore, StorageError};
use futures::StreamExt;
use metrics::counter;
use service_core::error::AppError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A downloaded object on local disk.
///
/// The file is removed when the value is dropped or explicitly closed.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
    size: u64,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the file now, surfacing any I/O error instead of ignoring it.
    pub fn close(self) -> std::io::Result<()> {
        self.path.close()
    }
}

#[derive(Clone)]
pub struct ObjectFetcher {
    store: Arc<dyn ObjectStore>,
    scratch_dir: PathBuf,
    max_object_bytes: u64,
}

impl ObjectFetcher {
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        scratch_dir: impl Into<PathBuf>,
        max_object_bytes: u64,
    ) -> Result<Self, AppError> {
        let scratch_dir = scratch_dir.into();
        if !scratch_dir.exists() {
            fs::create_dir_all(&scratch_dir).await?;
        }
        Ok(Self {
            store,
            scratch_dir,
            max_object_bytes,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Download `bucket/key` into a uniquely named scratch file.
    ///
    /// On any failure the partially written file is deleted before the error
    /// is returned.
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<ScratchFile, StorageError> {
        let mut stream = self.store.open(bucket, key).await?;

        let (std_file, path) = tempfile::Builder::new()
            .prefix("fetch-")
            .tempfile_in(&self.scratch_dir)?
            .into_parts();
        let mut file = fs::File::from_std(std_file);

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > self.max_object_bytes {
                tracing::warn!(
                    bucket = %bucket,
                    key = %key,
                    limit = self.max_object_bytes,
                    "Object exceeds size limit, aborting download"
                );
                return Err(StorageError::TooLarge {
                    limit: self.max_object_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        counter!("storage_fetch_bytes_total", "backend" => self.store.backend()).increment(written);

        tracing::debug!(
            bucket = %bucket,
            key = %key,
            size = written,
            path = %path.display(),
            "Object staged to scratch file"
        );

        Ok(ScratchFile {
            path,
            size: written,
        })
    }
}
