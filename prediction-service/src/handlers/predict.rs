use crate::dtos::{PredictionRequest, PredictionResponse};
use crate::services::PipelineError;
use crate::startup::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use metrics::counter;
use service_core::error::AppError;

/// `POST /predict`: stage the named FASTA object and run the engine on its
/// targets.
#[tracing::instrument(skip(state, payload))]
pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, AppError> {
    let result = handle(&state, payload).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    counter!("prediction_requests_total", "outcome" => outcome).increment(1);

    match result {
        Ok(response) => {
            tracing::info!(
                targets = response.predictions.len(),
                "Prediction request completed"
            );
            Ok(Json(response))
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle(
    state: &AppState,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<PredictionResponse, PipelineError> {
    // A dead engine answers 503 before the request is validated or fetched.
    if let Err(reason) = state.pipeline.engine_status().engine() {
        return Err(PipelineError::Initialization(reason.to_string()));
    }

    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "Rejected malformed request body");
        PipelineError::ClientInput(rejection.body_text())
    })?;

    let location = request.into_location().map_err(|errors| {
        tracing::warn!(error = %errors, "Rejected incomplete prediction request");
        PipelineError::from(errors)
    })?;

    state.pipeline.run(&location).await
}
