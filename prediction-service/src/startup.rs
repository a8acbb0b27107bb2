use crate::config::{PredictionConfig, StorageBackend};
use crate::handlers;
use crate::services::{
    EngineStatus, GcsObjectStore, LocalObjectStore, ObjectFetcher, ObjectStore,
    PredictionPipeline,
};
use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: PredictionPipeline,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(handlers::predict))
        .route("/", post(handlers::predict))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: PredictionConfig) -> Result<Self, AppError> {
        let store: Arc<dyn ObjectStore> = match config.storage.backend {
            StorageBackend::Local => Arc::new(
                LocalObjectStore::new(&config.storage.local_root)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            "Failed to initialize local storage at {}: {}",
                            config.storage.local_root.display(),
                            e
                        );
                        e
                    })?,
            ),
            StorageBackend::Gcs => Arc::new(GcsObjectStore::new(&config.storage).map_err(|e| {
                tracing::error!("Failed to initialize GCS client: {}", e);
                e
            })?),
        };
        tracing::info!(backend = store.backend(), "Object storage configured");

        let fetcher = ObjectFetcher::new(
            store,
            &config.scratch_dir,
            config.storage.max_object_bytes,
        )
        .await?;

        // An engine that fails to start is kept as a failed status, not a startup error.
        let engine = EngineStatus::initialize(&config.engine).await;

        let state = AppState {
            pipeline: PredictionPipeline::new(fetcher, engine),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let app = build_router(self.state);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
