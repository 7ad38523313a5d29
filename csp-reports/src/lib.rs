//! csp-reports library - survey report storage and dashboard
//!
//! Reports live in an object store under `reports/{workspace}/{survey}/`. This
//! crate writes them, merges asynchronous enrichment into them, lists them back
//! and reduces them to dashboard statistics.

use axum::Router;
use csp_common::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub mod aggregate;
pub mod api;
pub mod enrichment;
pub mod error;
pub mod flow;
pub mod keys;
pub mod lister;
pub mod pagination;
pub mod store;
pub mod writer;

pub use enrichment::{AnalysisService, EnrichmentPipeline, HttpAnalysisService};
pub use flow::SubmissionFlow;
pub use lister::{ListScope, ReportCache, ReportEntry, ReportLister};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use writer::{ReportWriter, WriteResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub lister: ReportLister,
    pub writer: ReportWriter,
    pub cache: Arc<ReportCache>,
    /// `None` when no analysis endpoint is configured
    pub pipeline: Option<EnrichmentPipeline>,
    /// Cancelled on shutdown; in-flight listings stop early
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        lister: ReportLister,
        writer: ReportWriter,
        cache: Arc<ReportCache>,
        pipeline: Option<EnrichmentPipeline>,
    ) -> Self {
        let pipeline = pipeline.map(|p| p.with_cache(Arc::clone(&cache)));
        Self {
            lister,
            writer,
            cache,
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reports in `scope`, through the listing cache
    pub async fn load_scope(&self, scope: &ListScope) -> Result<Arc<Vec<ReportEntry>>> {
        let prefix = scope.prefix()?;
        let cancel = self.shutdown.child_token();
        let (reader, prefix_ref, cancel_ref) = (&self.lister, prefix.as_str(), &cancel);
        self.cache
            .get_or_load(&prefix, move || async move {
                let mut entries = reader.list_entries_by_prefix(prefix_ref, cancel_ref).await?;
                lister::sort_entries_by_recency(&mut entries);
                Ok(entries)
            })
            .await
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route(
            "/api/reports",
            get(api::list_reports).post(api::create_report),
        )
        .route("/api/overview", get(api::get_overview))
        .route("/api/trend", get(api::get_trend))
        .route(
            "/api/workspaces/:name/surveys",
            get(api::list_survey_folders),
        )
        .merge(api::health_routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
}
