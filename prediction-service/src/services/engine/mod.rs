//! Prediction engine abstraction.
//!
//! The service never runs a model itself. An engine takes the ordered list of
//! target identifiers and hands back one opaque artifact per target. Engines
//! are built once at startup; a failed build is kept as an unhealthy status
//! instead of being retried.

pub mod assets;
pub mod echo;
pub mod remote;

use crate::config::{EngineConfig, EngineKind};
use crate::services::fasta::TargetIdentifier;
use assets::{AssetCache, ModelAssets};
use async_trait::async_trait;
use echo::EchoEngine;
use remote::RemoteEngine;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine error: engine unreachable: {0}")]
    Unavailable(String),

    #[error("Engine error: engine returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Engine error: malformed engine output: {0}")]
    MalformedOutput(String),

    #[error("Engine error: no prediction returned for target '{0}'")]
    MissingTarget(TargetIdentifier),
}

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Initialization error: {0}")]
    Config(String),

    #[error("Initialization error: failed to download {url}: {reason}")]
    AssetDownload { url: String, reason: String },

    #[error("Initialization error: model cache at {path}: {source}")]
    Cache {
        path: String,
        source: std::io::Error,
    },
}

/// What the engine produced for a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Artifact {
    /// A path, URI or other handle to output stored elsewhere.
    Reference(String),
    /// Structured output returned inline.
    Summary(serde_json::Value),
}

/// Per-target artifacts in the order the targets were submitted.
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionResult {
    entries: Vec<(TargetIdentifier, Artifact)>,
}

impl PredictionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: TargetIdentifier, artifact: Artifact) {
        self.entries.push((target, artifact));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, target: &str) -> Option<&Artifact> {
        self.entries
            .iter()
            .find(|(id, _)| id == target)
            .map(|(_, artifact)| artifact)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TargetIdentifier, &Artifact)> {
        self.entries.iter().map(|(id, artifact)| (id, artifact))
    }
}

impl FromIterator<(TargetIdentifier, Artifact)> for PredictionResult {
    fn from_iter<I: IntoIterator<Item = (TargetIdentifier, Artifact)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for PredictionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, artifact) in &self.entries {
            map.serialize_entry(id, artifact)?;
        }
        map.end()
    }
}

#[async_trait]
pub trait PredictionEngine: Send + Sync {
    /// Predict every target in one call. May run for an unbounded time.
    async fn predict(&self, targets: &[TargetIdentifier])
        -> Result<PredictionResult, EngineError>;

    /// Engine name reported by the health endpoint.
    fn name(&self) -> &'static str;
}

/// Outcome of the one-time engine initialization.
#[derive(Clone)]
pub enum EngineStatus {
    Ready(Arc<dyn PredictionEngine>),
    Failed(Arc<str>),
}

impl EngineStatus {
    /// Build the configured engine. Failures are logged and retained.
    pub async fn initialize(config: &EngineConfig) -> Self {
        match build_engine(config).await {
            Ok(engine) => {
                tracing::info!(engine = engine.name(), "Prediction engine initialized");
                EngineStatus::Ready(engine)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Prediction engine failed to initialize; service will report unhealthy"
                );
                EngineStatus::Failed(e.to_string().into())
            }
        }
    }

    pub fn engine(&self) -> Result<&Arc<dyn PredictionEngine>, &str> {
        match self {
            EngineStatus::Ready(engine) => Ok(engine),
            EngineStatus::Failed(reason) => Err(&**reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready(_))
    }
}

async fn build_engine(
    config: &EngineConfig,
) -> Result<Arc<dyn PredictionEngine>, InitializationError> {
    match config.kind {
        EngineKind::Echo => Ok(Arc::new(EchoEngine)),
        EngineKind::Remote => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                InitializationError::Config(
                    "ENGINE_ENDPOINT is required for the remote engine".to_string(),
                )
            })?;

            let cache = AssetCache::new(&config.cache_dir)?;
            if cache.cache_path(&config.checkpoint_url)? == cache.cache_path(&config.ccd_url)? {
                return Err(InitializationError::Config(format!(
                    "ENGINE_CHECKPOINT_URL '{}' and ENGINE_CCD_URL '{}' map to the same cache file",
                    config.checkpoint_url, config.ccd_url
                )));
            }

            let assets = ModelAssets {
                checkpoint: cache.ensure(&config.checkpoint_url).await?,
                ccd: cache.ensure(&config.ccd_url).await?,
            };

            Ok(Arc::new(RemoteEngine::new(endpoint, assets)?))
        }
    }
}
