#![allow(dead_code)]

use prediction_service::config::{
    EngineConfig, EngineKind, PredictionConfig, StorageBackend, StorageConfig, DEFAULT_CCD_URL,
    DEFAULT_CHECKPOINT_URL,
};
use prediction_service::startup::Application;
use serde_json::Value;
use service_core::config::Config as CoreConfig;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_BUCKET: &str = "boltz";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub storage: TempDir,
    pub scratch: TempDir,
    pub cache: TempDir,
}

/// Configuration for an echo engine over a local store, all under tempdirs.
pub fn test_config(storage: &Path, scratch: &Path, cache: &Path) -> PredictionConfig {
    PredictionConfig {
        common: CoreConfig { port: 0 },
        storage: StorageConfig {
            backend: StorageBackend::Local,
            local_root: storage.to_path_buf(),
            gcs_base_url: "http://127.0.0.1:1".to_string(),
            gcs_access_token: None,
            timeout_secs: 5,
            max_object_bytes: 1024 * 1024,
        },
        scratch_dir: scratch.to_path_buf(),
        engine: EngineConfig {
            kind: EngineKind::Echo,
            endpoint: None,
            cache_dir: cache.to_path_buf(),
            checkpoint_url: DEFAULT_CHECKPOINT_URL.to_string(),
            ccd_url: DEFAULT_CCD_URL.to_string(),
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(customize: impl FnOnce(&mut PredictionConfig)) -> Self {
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        let scratch = tempfile::tempdir().expect("Failed to create scratch dir");
        let cache = tempfile::tempdir().expect("Failed to create cache dir");

        let mut config = test_config(storage.path(), scratch.path(), cache.path());
        customize(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped(std::future::pending()).await.ok();
        });

        let address = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();

        // Wait for the server by polling the health endpoint
        for _ in 0..50 {
            if client
                .get(format!("{}/health", address))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            storage,
            scratch,
            cache,
        }
    }

    /// Place an object in the local store.
    pub fn put(&self, key: &str, content: &str) {
        let path = self.storage.path().join(TEST_BUCKET).join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub async fn predict(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/predict", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

/// Serve `app` on an ephemeral port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}
