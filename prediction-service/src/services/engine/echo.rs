//! Stub engine for local development and tests.

use super::{Artifact, EngineError, PredictionEngine, PredictionResult};
use crate::services::fasta::TargetIdentifier;
use async_trait::async_trait;

/// Answers every target with the reference `prediction_<target>` without
/// running a model.
pub struct EchoEngine;

#[async_trait]
impl PredictionEngine for EchoEngine {
    async fn predict(
        &self,
        targets: &[TargetIdentifier],
    ) -> Result<PredictionResult, EngineError> {
        Ok(targets
            .iter()
            .map(|id| (id.clone(), Artifact::Reference(format!("prediction_{}", id))))
            .collect())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
