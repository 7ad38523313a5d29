//! Survey registry and submission lifecycle endpoints
//!
//! The submission actions use custom-method suffixes (`submissions:start`,
//! `submissions/{id}:complete`) which the router cannot express as literal
//! segments, so everything below `/surveys/:survey_id/` is routed through one
//! wildcard and dispatched by [`SubmissionRoute::parse`].

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use csp_common::submission::{
    CompleteSubmissionRequest, RegisterSurveyRequest, StartSubmissionRequest, SurveyRecord,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::db::{submissions, surveys};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Sub-resource addressed below `/surveys/:survey_id/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionRoute {
    /// `submissions`
    Collection,
    /// `submissions:start`
    Start,
    /// `submissions/{id}:complete`
    Complete(Uuid),
}

impl SubmissionRoute {
    pub fn parse(rest: &str) -> Option<Self> {
        let rest = rest.trim_start_matches('/');
        match rest {
            "submissions" => Some(SubmissionRoute::Collection),
            "submissions:start" => Some(SubmissionRoute::Start),
            _ => {
                let id = rest
                    .strip_prefix("submissions/")?
                    .strip_suffix(":complete")?;
                Uuid::parse_str(id).ok().map(SubmissionRoute::Complete)
            }
        }
    }
}

/// PUT /surveys/:survey_id
pub async fn register_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<SurveyRecord>> {
    let request: RegisterSurveyRequest = parse_body(&body)?;
    let survey =
        surveys::upsert_survey(&state.db, &survey_id, &request.workspace_id, &request.title)
            .await?;
    tracing::info!(survey_id = %survey.id, workspace_id = %survey.workspace_id, "Survey registered");
    Ok(Json(survey))
}

/// GET /surveys/:survey_id
pub async fn get_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
) -> ApiResult<Json<SurveyRecord>> {
    surveys::get_survey(&state.db, &survey_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("survey {}", survey_id)))
}

/// POST /surveys/:survey_id/submissions:start
/// POST /surveys/:survey_id/submissions/:submission_id:complete
pub async fn post_submission_action(
    State(state): State<AppState>,
    Path((survey_id, rest)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    match SubmissionRoute::parse(&rest) {
        Some(SubmissionRoute::Start) => {
            let request: StartSubmissionRequest = parse_body(&body)?;
            let record = submissions::start_submission(&state.db, &survey_id, &request).await?;
            Ok((StatusCode::CREATED, Json(record)).into_response())
        }
        Some(SubmissionRoute::Complete(submission_id)) => {
            let request: CompleteSubmissionRequest = parse_body(&body)?;
            let record = submissions::finish_submission(
                &state.db,
                &survey_id,
                submission_id,
                request.completion_status,
                request.completion_time,
            )
            .await?;
            Ok(Json(record).into_response())
        }
        Some(SubmissionRoute::Collection) | None => Err(ApiError::NotFound(format!(
            "no POST route for /surveys/{}/{}",
            survey_id, rest
        ))),
    }
}

/// GET /surveys/:survey_id/submissions
pub async fn get_submission_resource(
    State(state): State<AppState>,
    Path((survey_id, rest)): Path<(String, String)>,
) -> ApiResult<Response> {
    match SubmissionRoute::parse(&rest) {
        Some(SubmissionRoute::Collection) => {
            let log = submissions::list_submissions(&state.db, &survey_id).await?;
            Ok(Json(log).into_response())
        }
        _ => Err(ApiError::NotFound(format!(
            "no GET route for /surveys/{}/{}",
            survey_id, rest
        ))),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}
