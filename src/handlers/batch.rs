use axum::{Json, extract::State, extract::rejection::JsonRejection};
use metrics::counter;

use crate::{
    batch::BatchMode,
    error::JudgeError,
    types::{AppState, BatchRequest, BatchResponse},
};

async fn run_batch(
    state: AppState,
    payload: Result<Json<BatchRequest>, JsonRejection>,
    mode: BatchMode,
) -> Result<Json<BatchResponse>, JudgeError> {
    let Json(payload) = payload.map_err(|e| JudgeError::BadRequest(e.body_text()))?;
    let batch = state.batch.clone();

    let response = tokio::spawn(async move { batch.run_all(payload, mode).await })
        .await
        .map_err(|e| JudgeError::Internal(format!("batch task failed: {}", e)))??;

    Ok(Json(response))
}

/// Sample run: per-case details are always returned.
pub async fn run_tests_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, JudgeError> {
    counter!("requests_total", "endpoint" => "run").increment(1);
    run_batch(state, payload, BatchMode::Run).await
}

/// Graded submission: details are hidden unless every case passed.
pub async fn submit_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, JudgeError> {
    counter!("requests_total", "endpoint" => "submit").increment(1);
    run_batch(state, payload, BatchMode::Submit).await
}
