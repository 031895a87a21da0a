use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{error::JudgeError, types::AppState};

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
}

fn keys_match(expected: &str, presented: &str) -> bool {
    // compare without early exit on the first differing byte
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Rejects requests without the configured API key before any job work.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, JudgeError> {
    if let Some(expected) = state.api_key.as_deref() {
        match presented_key(request.headers()) {
            Some(key) if keys_match(expected, key) => {}
            _ => {
                tracing::warn!(path = %request.uri().path(), "rejected unauthenticated request");
                return Err(JudgeError::Unauthorized);
            }
        }
    }
    Ok(next.run(request).await)
}
