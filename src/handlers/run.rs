use axum::{Json, extract::State, extract::rejection::JsonRejection};
use metrics::counter;

use crate::{
    error::JudgeError,
    types::{AppState, ExecuteRequest, ExecuteResponse},
};

pub async fn execute_code_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, JudgeError> {
    counter!("requests_total", "endpoint" => "execute").increment(1);

    let Json(payload) = payload.map_err(|e| JudgeError::BadRequest(e.body_text()))?;
    let judge = state.judge.clone();

    // A separate task keeps the job running to completion (and cleaning up)
    // even if the client disconnects mid-request.
    let response = tokio::spawn(async move { judge.execute(payload).await })
        .await
        .map_err(|e| JudgeError::Internal(format!("execution task failed: {}", e)))??;

    Ok(Json(response))
}
