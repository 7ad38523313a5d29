//! csp-tracker library - survey submission lifecycle
//!
//! Backend (axum + SQLite) for the submission API, an HTTP client for it, and
//! the client-side [`SubmissionTracker`] used by the submission flow.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

pub mod api;
pub mod client;
pub mod db;
pub mod error;
pub mod tracker;

pub use client::{HttpSubmissionApi, SubmissionApi};
pub use db::SubmissionStore;
pub use tracker::{AbandonGuard, SubmissionTracker};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, put};

    Router::new()
        .route(
            "/surveys/:survey_id",
            put(api::register_survey).get(api::get_survey),
        )
        .route(
            "/surveys/:survey_id/*rest",
            get(api::get_submission_resource).post(api::post_submission_action),
        )
        .merge(api::health_routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
}
