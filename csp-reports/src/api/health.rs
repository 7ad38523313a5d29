//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// False when the store cannot be reached
    pub store: bool,
    pub enrichment: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.writer.store().ping().await.is_ok();

    Json(HealthResponse {
        status: if store { "ok" } else { "degraded" }.to_string(),
        module: "csp-reports".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store,
        enrichment: state.pipeline.is_some(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
