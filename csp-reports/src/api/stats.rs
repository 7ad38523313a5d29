//! Dashboard statistics

use axum::{
    extract::{Query, State},
    Json,
};
use csp_common::time;
use serde::{Deserialize, Serialize};

use crate::aggregate::{self, Bucket, Granularity, Overview, Window, WorkspaceStat};
use crate::error::ApiResult;
use crate::lister::ListScope;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub workspace: Option<String>,
    pub survey: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub overview: Overview,
    pub workspaces: Vec<WorkspaceStat>,
}

/// GET /api/overview
pub async fn get_overview(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<OverviewResponse>> {
    let scope = ListScope::from_filters(query.workspace.as_deref(), query.survey.as_deref())?;
    let entries = state.load_scope(&scope).await?;
    let reports = entries.iter().map(|e| &e.report);

    Ok(Json(OverviewResponse {
        overview: aggregate::overview(reports.clone()),
        workspaces: aggregate::workspace_breakdown(reports),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    #[serde(default = "default_granularity")]
    pub granularity: String,
    #[serde(default = "default_window")]
    pub window: String,
    pub workspace: Option<String>,
    pub survey: Option<String>,
}

fn default_granularity() -> String {
    "day".to_string()
}

fn default_window() -> String {
    "7d".to_string()
}

#[derive(Debug, Serialize)]
pub struct TrendResponse {
    pub granularity: Granularity,
    pub window: String,
    pub buckets: Vec<Bucket>,
}

/// GET /api/trend
pub async fn get_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<Json<TrendResponse>> {
    let granularity: Granularity = query.granularity.parse()?;
    let window: Window = query.window.parse()?;
    let scope = ListScope::from_filters(query.workspace.as_deref(), query.survey.as_deref())?;

    let entries = state.load_scope(&scope).await?;
    let buckets = aggregate::time_series(
        entries.iter().map(|e| &e.report),
        granularity,
        window,
        time::now().fixed_offset(),
    );

    Ok(Json(TrendResponse {
        granularity,
        window: window.to_string(),
        buckets,
    }))
}
