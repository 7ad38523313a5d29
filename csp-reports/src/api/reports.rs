//! Report listing and creation

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use csp_common::report::ReportDraft;
use csp_common::time;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::lister::{ListScope, ReportEntry};
use crate::pagination::{calculate_pagination, page_of, Pagination};
use crate::writer::WriteResult;
use crate::AppState;

/// Query parameters for report listing
#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    pub workspace: Option<String>,
    pub survey: Option<String>,

    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct ReportPage {
    #[serde(flatten)]
    pub pagination: Pagination,
    pub reports: Vec<ReportEntry>,
}

/// GET /api/reports
///
/// Newest first, 100 per page.
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Json<ReportPage>> {
    let scope = ListScope::from_filters(query.workspace.as_deref(), query.survey.as_deref())?;
    let entries = state.load_scope(&scope).await?;

    let pagination = calculate_pagination(entries.len(), query.page);
    let reports = page_of(&entries, &pagination).to_vec();

    Ok(Json(ReportPage {
        pagination,
        reports,
    }))
}

/// POST /api/reports
///
/// Writes the base report built from a draft and starts enrichment in the
/// background.
pub async fn create_report(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WriteResult>)> {
    let draft: ReportDraft = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    let report = draft.into_report(time::now());
    let written = state.writer.write_base_report(&report).await?;
    state.cache.invalidate_key(&written.key).await;

    if let Some(pipeline) = &state.pipeline {
        pipeline.spawn(written.key.clone(), report);
    }

    info!(key = %written.key, "Report accepted");
    Ok((StatusCode::CREATED, Json(written)))
}

#[derive(Debug, Serialize)]
pub struct SurveyFolders {
    pub workspace: String,
    pub surveys: Vec<String>,
}

/// GET /api/workspaces/:name/surveys
pub async fn list_survey_folders(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> ApiResult<Json<SurveyFolders>> {
    let surveys = state.lister.list_survey_folders(&workspace).await?;
    Ok(Json(SurveyFolders { workspace, surveys }))
}
