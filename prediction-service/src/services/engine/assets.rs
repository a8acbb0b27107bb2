//! Local cache for model weights and reference data.

use super::InitializationError;
use futures::StreamExt;
use reqwest::{Client, Url};
use service_core::observability::TracedClientExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Files the engine loads alongside each prediction run.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    pub checkpoint: PathBuf,
    pub ccd: PathBuf,
}

pub struct AssetCache {
    client: Client,
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, InitializationError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| InitializationError::Cache {
            path: dir.display().to_string(),
            source,
        })?;

        // Checkpoints run to gigabytes, so only the connect phase is bounded.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                InitializationError::Config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, dir })
    }

    /// Return the cached copy of `url`, downloading it first if absent.
    ///
    /// The file name is the last path segment of the URL. Downloads land in a
    /// temporary file that is renamed into place only once complete, so an
    /// interrupted download never leaves a truncated asset behind.
    pub async fn ensure(&self, url: &str) -> Result<PathBuf, InitializationError> {
        let (parsed, target) = self.resolve(url)?;
        if target.is_file() {
            tracing::debug!(path = %target.display(), "Model asset found in cache");
            return Ok(target);
        }

        tracing::info!(url = %url, path = %target.display(), "Downloading model asset");
        let size = self.download(parsed, &target).await?;
        tracing::info!(path = %target.display(), size, "Model asset cached");

        Ok(target)
    }

    /// Path in the cache where `url` is stored.
    pub fn cache_path(&self, url: &str) -> Result<PathBuf, InitializationError> {
        Ok(self.resolve(url)?.1)
    }

    fn resolve(&self, url: &str) -> Result<(Url, PathBuf), InitializationError> {
        let parsed = Url::parse(url).map_err(|e| {
            InitializationError::Config(format!("invalid asset URL '{}': {}", url, e))
        })?;
        let file_name = asset_file_name(&parsed).ok_or_else(|| {
            InitializationError::Config(format!("asset URL '{}' has no file name", url))
        })?;
        let target = self.dir.join(file_name);
        Ok((parsed, target))
    }

    async fn download(&self, url: Url, target: &Path) -> Result<u64, InitializationError> {
        let download_err = |reason: String| InitializationError::AssetDownload {
            url: url.to_string(),
            reason,
        };
        let cache_err = |source: std::io::Error| InitializationError::Cache {
            path: self.dir.display().to_string(),
            source,
        };

        let response = self
            .client
            .traced_get(url.clone())
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("server returned {}", response.status())));
        }

        let (std_file, partial) = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.dir)
            .map_err(cache_err)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk).await.map_err(cache_err)?;
            written += chunk.len() as u64;
        }
        file.sync_all().await.map_err(cache_err)?;
        drop(file);

        partial.persist(target).map_err(|e| cache_err(e.error))?;
        Ok(written)
    }
}

fn asset_file_name(url: &Url) -> Option<&str> {
    url.path_segments()?.last().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    async fn serve_assets() -> String {
        let app = Router::new()
            .route("/models/boltz1_conf.ckpt", get(|| async { "checkpoint-bytes" }))
            .route(
                "/models/broken.pkl",
                get(|| async { (StatusCode::FORBIDDEN, "denied") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        let url = Url::parse("https://huggingface.co/a/b/resolve/main/ccd.pkl").unwrap();
        assert_eq!(asset_file_name(&url), Some("ccd.pkl"));

        let url = Url::parse("https://example.com/models/").unwrap();
        assert_eq!(asset_file_name(&url), None);
    }

    #[tokio::test]
    async fn downloads_missing_asset_once() {
        let base = serve_assets().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path()).unwrap();
        let url = format!("{}/models/boltz1_conf.ckpt", base);

        let path = cache.ensure(&url).await.unwrap();
        assert_eq!(path, dir.path().join("boltz1_conf.ckpt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "checkpoint-bytes");

        // A second call is served from disk.
        std::fs::write(&path, "cached").unwrap();
        let again = cache.ensure(&url).await.unwrap();
        assert_eq!(std::fs::read_to_string(again).unwrap(), "cached");
        assert_eq!(entries(dir.path()), vec!["boltz1_conf.ckpt"]);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_partial_file() {
        let base = serve_assets().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path()).unwrap();

        let err = cache
            .ensure(&format!("{}/models/broken.pkl", base))
            .await
            .unwrap_err();

        assert!(matches!(err, InitializationError::AssetDownload { .. }));
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn cache_path_uses_last_segment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path()).unwrap();

        let path = cache
            .cache_path("https://huggingface.co/a/resolve/main/ccd.pkl")
            .unwrap();
        assert_eq!(path, dir.path().join("ccd.pkl"));
    }

    #[tokio::test]
    async fn rejects_url_without_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path()).unwrap();

        let err = cache.ensure("https://example.com/").await.unwrap_err();
        assert!(matches!(err, InitializationError::Config(_)));
    }
}
