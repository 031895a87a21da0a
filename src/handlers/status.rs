use axum::{Json, extract::State};

use crate::{
    languages::LanguageInfo,
    types::{AppState, HealthResponse, StatsResponse},
};

pub async fn health_endpoint(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_jobs: state.judge.registry().len(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}

pub async fn stats_endpoint(State(state): State<AppState>) -> Json<StatsResponse> {
    let jobs = state.judge.registry().snapshot();
    Json(StatsResponse {
        active_jobs: jobs.len(),
        jobs,
    })
}

pub async fn languages_endpoint(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    Json(state.judge.languages().list())
}
