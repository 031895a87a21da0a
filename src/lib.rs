pub mod batch;
pub mod config;
pub mod error;
pub mod handlers;
pub mod judge;
pub mod languages;
pub mod registry;
pub mod sandbox;
pub mod system_monitor;
pub mod types;
pub mod workspace;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::handlers::{
    auth::require_api_key,
    batch::{run_tests_endpoint, submit_endpoint},
    metrics::metrics_endpoint,
    run::execute_code_endpoint,
    status::{health_endpoint, languages_endpoint, stats_endpoint},
};
use crate::types::AppState;

/// Builds the HTTP surface. Job endpoints and `/stats` sit behind the API key
/// check; health, language listing and metrics stay open.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/execute", post(execute_code_endpoint))
        .route("/run", post(run_tests_endpoint))
        .route("/submit", post(submit_endpoint))
        .route("/stats", get(stats_endpoint))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .merge(protected)
        .route("/health", get(health_endpoint))
        .route("/languages", get(languages_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}
