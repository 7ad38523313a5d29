//! Submission lifecycle persistence
//!
//! State machine: `started → completed | abandoned`. Complete is idempotent and
//! may correct an earlier abandon; abandon only applies while still started.

use async_trait::async_trait;
use csp_common::submission::{
    plan_transition, StartSubmissionRequest, SubmissionLog, SubmissionRecord, SubmissionStatus,
    Transition,
};
use csp_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::surveys::{get_survey, parse_utc};
use crate::client::SubmissionApi;

const SELECT_COLUMNS: &str = "id, survey_id, workspace_id, respondent_name, respondent_email, \
     status, started_at, completed_at, completion_time_seconds";

/// Open a lifecycle record for a respondent who passed identity capture
pub async fn start_submission(
    pool: &SqlitePool,
    survey_id: &str,
    request: &StartSubmissionRequest,
) -> Result<SubmissionRecord> {
    let respondent_name = request.respondent_name.trim();
    if respondent_name.is_empty() {
        return Err(Error::Validation("respondent_name must not be empty".to_string()));
    }

    let survey = get_survey(pool, survey_id)
        .await?
        .ok_or_else(|| Error::Validation(format!("Unknown survey id: {}", survey_id)))?;

    let record = SubmissionRecord {
        id: Uuid::new_v4(),
        survey_id: survey.id,
        workspace_id: survey.workspace_id,
        respondent_name: respondent_name.to_string(),
        respondent_email: request.respondent_email.trim().to_string(),
        status: SubmissionStatus::Started,
        started_at: time::now(),
        completed_at: None,
        completion_time_seconds: None,
    };

    sqlx::query(
        r#"
        INSERT INTO submissions (
            id, survey_id, workspace_id, respondent_name, respondent_email,
            status, started_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.survey_id)
    .bind(&record.workspace_id)
    .bind(&record.respondent_name)
    .bind(&record.respondent_email)
    .bind(record.status.as_str())
    .bind(time::to_rfc3339(&record.started_at))
    .execute(pool)
    .await?;

    info!(
        submission_id = %record.id,
        survey_id = %record.survey_id,
        respondent = %record.respondent_name,
        "Submission started"
    );

    Ok(record)
}

pub async fn get_submission(
    pool: &SqlitePool,
    survey_id: &str,
    submission_id: Uuid,
) -> Result<Option<SubmissionRecord>> {
    let sql = format!(
        "SELECT {} FROM submissions WHERE id = ? AND survey_id = ?",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(submission_id.to_string())
        .bind(survey_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Apply a terminal transition
///
/// Returns the record as stored afterwards. A refused transition (repeat
/// complete, abandon after a terminal state) returns the current record
/// without error.
pub async fn finish_submission(
    pool: &SqlitePool,
    survey_id: &str,
    submission_id: Uuid,
    requested: SubmissionStatus,
    completion_time: Option<i64>,
) -> Result<SubmissionRecord> {
    if matches!(completion_time, Some(t) if t < 0) {
        return Err(Error::Validation(
            "completion_time must not be negative".to_string(),
        ));
    }

    let current = get_submission(pool, survey_id, submission_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))?;

    if plan_transition(current.status, requested)? == Transition::NoOp {
        debug!(
            submission_id = %submission_id,
            current = %current.status,
            requested = %requested,
            "Terminal transition ignored"
        );
        return Ok(current);
    }

    let finished_at = time::now();
    let elapsed = completion_time
        .unwrap_or_else(|| (finished_at - current.started_at).num_seconds().max(0));

    // The WHERE guard re-checks the state inside SQLite so a racing call
    // that landed between our read and this write is not overwritten.
    let sql = if requested == SubmissionStatus::Completed {
        r#"
        UPDATE submissions
        SET status = 'completed', completed_at = ?, completion_time_seconds = ?
        WHERE id = ? AND survey_id = ? AND status <> 'completed'
        "#
    } else {
        r#"
        UPDATE submissions
        SET status = 'abandoned', completed_at = ?, completion_time_seconds = ?
        WHERE id = ? AND survey_id = ? AND status = 'started'
        "#
    };

    let result = sqlx::query(sql)
        .bind(time::to_rfc3339(&finished_at))
        .bind(elapsed)
        .bind(submission_id.to_string())
        .bind(survey_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        debug!(
            submission_id = %submission_id,
            requested = %requested,
            "Concurrent terminal transition won; returning stored state"
        );
    } else {
        info!(
            submission_id = %submission_id,
            status = %requested,
            completion_time_seconds = elapsed,
            "Submission finished"
        );
    }

    get_submission(pool, survey_id, submission_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))
}

/// Submission log for one survey with per-status counts
pub async fn list_submissions(pool: &SqlitePool, survey_id: &str) -> Result<SubmissionLog> {
    if get_survey(pool, survey_id).await?.is_none() {
        return Err(Error::NotFound(format!("survey {}", survey_id)));
    }

    let sql = format!(
        "SELECT {} FROM submissions WHERE survey_id = ? ORDER BY started_at DESC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(survey_id).fetch_all(pool).await?;
    let submissions = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;

    let counts = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_count,
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_count,
            COALESCE(SUM(CASE WHEN status = 'started' THEN 1 ELSE 0 END), 0) AS started_count,
            COALESCE(SUM(CASE WHEN status = 'abandoned' THEN 1 ELSE 0 END), 0) AS abandoned_count
        FROM submissions
        WHERE survey_id = ?
        "#,
    )
    .bind(survey_id)
    .fetch_one(pool)
    .await?;

    Ok(SubmissionLog {
        submissions,
        total_count: counts.get("total_count"),
        completed_count: counts.get("completed_count"),
        started_count: counts.get("started_count"),
        abandoned_count: counts.get("abandoned_count"),
    })
}

fn row_to_record(row: &SqliteRow) -> Result<SubmissionRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(SubmissionRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Failed to parse submission id: {}", e)))?,
        survey_id: row.get("survey_id"),
        workspace_id: row.get("workspace_id"),
        respondent_name: row.get("respondent_name"),
        respondent_email: row.get("respondent_email"),
        status: status.parse()?,
        started_at: parse_utc(&started_at, "started_at")?,
        completed_at: completed_at
            .as_deref()
            .map(|raw| parse_utc(raw, "completed_at"))
            .transpose()?,
        completion_time_seconds: row.get("completion_time_seconds"),
    })
}

/// Direct database access behind the same interface as the HTTP client
#[derive(Clone)]
pub struct SubmissionStore {
    pool: SqlitePool,
}

impl SubmissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SubmissionApi for SubmissionStore {
    async fn start(
        &self,
        survey_id: &str,
        respondent_name: &str,
        respondent_email: &str,
    ) -> Result<SubmissionRecord> {
        let request = StartSubmissionRequest {
            respondent_name: respondent_name.to_string(),
            respondent_email: respondent_email.to_string(),
        };
        start_submission(&self.pool, survey_id, &request).await
    }

    async fn finish(
        &self,
        survey_id: &str,
        submission_id: Uuid,
        status: SubmissionStatus,
        completion_time: Option<i64>,
    ) -> Result<SubmissionRecord> {
        finish_submission(&self.pool, survey_id, submission_id, status, completion_time).await
    }
}
