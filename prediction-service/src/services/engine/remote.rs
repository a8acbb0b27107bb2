//! Client for an external inference server.
//!
//! The server owns the model and GPU. This side only ships target
//! identifiers plus the locations of the cached checkpoint and CCD, and maps
//! the answer back onto the submitted order.

use super::assets::ModelAssets;
use super::{Artifact, EngineError, InitializationError, PredictionEngine, PredictionResult};
use crate::services::fasta::TargetIdentifier;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::collections::HashMap;

#[derive(Serialize)]
struct RemotePredictRequest<'a> {
    targets: &'a [TargetIdentifier],
    checkpoint: String,
    ccd: String,
}

#[derive(Deserialize)]
struct RemotePredictResponse {
    predictions: HashMap<TargetIdentifier, Artifact>,
}

pub struct RemoteEngine {
    client: Client,
    predict_url: Url,
    assets: ModelAssets,
}

impl RemoteEngine {
    pub fn new(endpoint: &str, assets: ModelAssets) -> Result<Self, InitializationError> {
        let mut base = Url::parse(endpoint).map_err(|e| {
            InitializationError::Config(format!("invalid ENGINE_ENDPOINT '{}': {}", endpoint, e))
        })?;
        // Keep any path prefix: "http://host/v1" must resolve to "/v1/predict".
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let predict_url = base.join("predict").map_err(|e| {
            InitializationError::Config(format!("invalid ENGINE_ENDPOINT '{}': {}", endpoint, e))
        })?;

        // No request timeout: a prediction may legitimately run for a long time.
        let client = Client::builder().build().map_err(|e| {
            InitializationError::Config(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            predict_url,
            assets,
        })
    }
}

#[async_trait]
impl PredictionEngine for RemoteEngine {
    async fn predict(
        &self,
        targets: &[TargetIdentifier],
    ) -> Result<PredictionResult, EngineError> {
        let request = RemotePredictRequest {
            targets,
            checkpoint: self.assets.checkpoint.display().to_string(),
            ccd: self.assets.ccd.display().to_string(),
        };

        tracing::debug!(
            url = %self.predict_url,
            target_count = targets.len(),
            "Sending targets to inference server"
        );

        let response = self
            .client
            .traced_post(self.predict_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected { status, body });
        }

        let mut output: RemotePredictResponse = response
            .json()
            .await
            .map_err(|e| EngineError::MalformedOutput(e.to_string()))?;

        let mut result = PredictionResult::new();
        for id in targets {
            let artifact = output
                .predictions
                .remove(id)
                .ok_or_else(|| EngineError::MissingTarget(id.clone()))?;
            result.push(id.clone(), artifact);
        }

        if !output.predictions.is_empty() {
            tracing::debug!(
                extra = output.predictions.len(),
                "Inference server returned predictions for unrequested targets; ignoring"
            );
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    fn assets() -> ModelAssets {
        ModelAssets {
            checkpoint: PathBuf::from("/cache/boltz1_conf.ckpt"),
            ccd: PathBuf::from("/cache/ccd.pkl"),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn predict_url_is_joined_onto_endpoint() {
        let engine = RemoteEngine::new("http://engine:9000", assets()).unwrap();
        assert_eq!(engine.predict_url.as_str(), "http://engine:9000/predict");

        let engine = RemoteEngine::new("http://engine:9000/v1", assets()).unwrap();
        assert_eq!(engine.predict_url.as_str(), "http://engine:9000/v1/predict");

        let engine = RemoteEngine::new("http://engine:9000/v1/", assets()).unwrap();
        assert_eq!(engine.predict_url.as_str(), "http://engine:9000/v1/predict");

        assert!(RemoteEngine::new("not a url", assets()).is_err());
    }

    #[tokio::test]
    async fn maps_output_back_to_submitted_order() {
        let app = Router::new().route(
            "/predict",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["checkpoint"], "/cache/boltz1_conf.ckpt");
                assert_eq!(body["ccd"], "/cache/ccd.pkl");
                let preds: serde_json::Map<String, Value> = body["targets"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .rev()
                    .map(|t| {
                        let id = t.as_str().unwrap().to_string();
                        let path = format!("out/{}.cif", id);
                        (id, Value::String(path))
                    })
                    .collect();
                Json(json!({ "predictions": preds }))
            }),
        );
        let engine = RemoteEngine::new(&serve(app).await, assets()).unwrap();

        let targets = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let result = engine.predict(&targets).await.unwrap();

        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"b":"out/b.cif","a":"out/a.cif","c":"out/c.cif"}"#
        );
    }

    #[tokio::test]
    async fn missing_target_in_output_is_an_error() {
        let app = Router::new().route(
            "/predict",
            post(|| async { Json(json!({ "predictions": { "a": "out/a.cif" } })) }),
        );
        let engine = RemoteEngine::new(&serve(app).await, assets()).unwrap();

        let err = engine
            .predict(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingTarget(id) if id == "b"));
    }

    #[tokio::test]
    async fn server_failure_is_rejected() {
        let app = Router::new().route(
            "/predict",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "CUDA out of memory") }),
        );
        let engine = RemoteEngine::new(&serve(app).await, assets()).unwrap();

        let err = engine.predict(&["a".to_string()]).await.unwrap_err();
        match err {
            EngineError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "CUDA out of memory");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_output_is_malformed() {
        let app = Router::new().route("/predict", post(|| async { "done" }));
        let engine = RemoteEngine::new(&serve(app).await, assets()).unwrap();

        let err = engine.predict(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let engine = RemoteEngine::new("http://127.0.0.1:9", assets()).unwrap();
        let err = engine.predict(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
