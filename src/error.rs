use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures that escape the job boundary. Everything that happens once a job
/// is admitted (compile errors, timeouts, crashes) is reported inside a
/// regular response instead.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),
}

impl JudgeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JudgeError::BadRequest(_) | JudgeError::UnsupportedLanguage(_) => {
                StatusCode::BAD_REQUEST
            }
            JudgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            JudgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for JudgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
