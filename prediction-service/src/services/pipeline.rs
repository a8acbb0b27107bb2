//! Per-request orchestration: fetch, extract, predict, respond.
//!
//! Each request walks `Received -> Fetched -> Parsed -> Predicted ->
//! Responded`. Any failure ends the walk; nothing is retried. The scratch
//! file is deleted as soon as extraction finishes, whatever its outcome.

use crate::dtos::{ObjectLocation, PredictionResponse};
use crate::services::engine::{EngineError, EngineStatus};
use crate::services::fasta::{self, ParseError, TargetIdentifier};
use crate::services::fetcher::ObjectFetcher;
use crate::services::storage::StorageError;
use metrics::histogram;
use service_core::error::AppError;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Fetched,
    Parsed,
    Predicted,
    Responded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Fetched => "fetched",
            Stage::Parsed => "parsed",
            Stage::Predicted => "predicted",
            Stage::Responded => "responded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Client input error: {0}")]
    ClientInput(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Prediction engine unavailable: {0}")]
    Initialization(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ClientInput(_) => "client_input_error",
            PipelineError::Storage(_) => "storage_error",
            PipelineError::Parse(_) => "parse_error",
            PipelineError::Engine(_) => "engine_error",
            PipelineError::Initialization(_) => "initialization_error",
        }
    }
}

impl From<ValidationErrors> for PipelineError {
    fn from(errors: ValidationErrors) -> Self {
        PipelineError::ClientInput(format!("invalid request: {}", errors))
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::ClientInput(_) => AppError::BadRequest(anyhow::anyhow!(message)),
            PipelineError::Storage(StorageError::Transfer(_)) => AppError::BadGateway(message),
            PipelineError::Storage(e) if e.is_client_error() => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            PipelineError::Parse(e) if e.is_client_error() => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            PipelineError::Storage(_) | PipelineError::Parse(_) | PipelineError::Engine(_) => {
                AppError::InternalError(anyhow::anyhow!(message))
            }
            PipelineError::Initialization(_) => AppError::ServiceUnavailable(message),
        }
    }
}

/// Request handler shared by every in-flight request.
///
/// Holds only immutable, startup-built handles, so cloning is cheap and no
/// request can observe another's state.
#[derive(Clone)]
pub struct PredictionPipeline {
    fetcher: ObjectFetcher,
    engine: EngineStatus,
}

impl PredictionPipeline {
    pub fn new(fetcher: ObjectFetcher, engine: EngineStatus) -> Self {
        Self { fetcher, engine }
    }

    pub fn engine_status(&self) -> &EngineStatus {
        &self.engine
    }

    #[tracing::instrument(skip(self, location), fields(bucket = %location.bucket, blob = %location.blob))]
    pub async fn run(&self, location: &ObjectLocation) -> Result<PredictionResponse, PipelineError> {
        let mut stage = Stage::Received;
        let result = self.advance(location, &mut stage).await;

        if let Err(e) = &result {
            tracing::warn!(
                stage = "errored",
                last_stage = %stage,
                kind = e.kind(),
                error = %e,
                "Prediction request failed"
            );
        }

        result
    }

    async fn advance(
        &self,
        location: &ObjectLocation,
        stage: &mut Stage,
    ) -> Result<PredictionResponse, PipelineError> {
        // Fail fast: an engine that never initialized cannot serve anything.
        let engine = self
            .engine
            .engine()
            .map_err(|reason| PipelineError::Initialization(reason.to_string()))?;

        tracing::debug!(stage = %stage, "Prediction request received");

        let started = Instant::now();
        let scratch = self
            .fetcher
            .fetch(&location.bucket, &location.blob)
            .await?;
        transition(stage, Stage::Fetched, started);

        let started = Instant::now();
        let extracted = fasta::extract(scratch.path()).await;
        let scratch_path = scratch.path().display().to_string();
        if let Err(e) = scratch.close() {
            tracing::warn!(path = %scratch_path, error = %e, "Failed to delete scratch file");
        }
        let targets = extracted?;
        check_targets(&targets)?;
        transition(stage, Stage::Parsed, started);

        histogram!("prediction_targets").record(targets.len() as f64);

        let started = Instant::now();
        let predictions = engine.predict(&targets).await?;
        transition(stage, Stage::Predicted, started);

        let started = Instant::now();
        let response = PredictionResponse { predictions };
        transition(stage, Stage::Responded, started);

        Ok(response)
    }
}

fn transition(stage: &mut Stage, next: Stage, started: Instant) {
    let elapsed = started.elapsed();
    histogram!("prediction_stage_duration_seconds", "stage" => next.as_str())
        .record(elapsed.as_secs_f64());
    tracing::debug!(
        from = %stage,
        to = %next,
        elapsed_ms = elapsed.as_millis() as u64,
        "Prediction stage complete"
    );
    *stage = next;
}

/// The engine keys its output by identifier, so an empty or ambiguous target
/// list cannot produce a meaningful response.
fn check_targets(targets: &[TargetIdentifier]) -> Result<(), PipelineError> {
    if targets.is_empty() {
        return Err(PipelineError::ClientInput(
            "source file contains no FASTA header lines".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(targets.len());
    for id in targets {
        if !seen.insert(id.as_str()) {
            return Err(PipelineError::ClientInput(format!(
                "duplicate target identifier '{}' in source file",
                id
            )));
        }
    }

    Ok(())
}
