use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::observability::get_metrics;

/// Liveness. Reports unhealthy for as long as the engine failed to start.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.engine_status().engine() {
        Ok(engine) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "prediction-service",
                "version": env!("CARGO_PKG_VERSION"),
                "engine": engine.name(),
            })),
        ),
        Err(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "prediction-service",
                "error": reason,
            })),
        ),
    }
}

pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.pipeline.engine_status().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
