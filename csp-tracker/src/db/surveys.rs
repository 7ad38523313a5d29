//! Survey registry

use chrono::{DateTime, Utc};
use csp_common::submission::SurveyRecord;
use csp_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Register a survey, or update workspace/title of an existing one
pub async fn upsert_survey(
    pool: &SqlitePool,
    survey_id: &str,
    workspace_id: &str,
    title: &str,
) -> Result<SurveyRecord> {
    if survey_id.trim().is_empty() {
        return Err(Error::Validation("survey id must not be empty".to_string()));
    }
    if workspace_id.trim().is_empty() {
        return Err(Error::Validation("workspace_id must not be empty".to_string()));
    }

    let created_at = csp_common::time::to_rfc3339(&csp_common::time::now());

    sqlx::query(
        r#"
        INSERT INTO surveys (id, workspace_id, title, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            workspace_id = excluded.workspace_id,
            title = excluded.title
        "#,
    )
    .bind(survey_id)
    .bind(workspace_id)
    .bind(title)
    .bind(&created_at)
    .execute(pool)
    .await?;

    get_survey(pool, survey_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("survey {} vanished after upsert", survey_id)))
}

pub async fn get_survey(pool: &SqlitePool, survey_id: &str) -> Result<Option<SurveyRecord>> {
    let row = sqlx::query("SELECT id, workspace_id, title, created_at FROM surveys WHERE id = ?")
        .bind(survey_id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        let created_at: String = row.get("created_at");
        Ok(SurveyRecord {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            title: row.get("title"),
            created_at: parse_utc(&created_at, "created_at")?,
        })
    })
    .transpose()
}

pub(crate) fn parse_utc(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn test_upsert_then_get() {
        let pool = init_memory_database().await.unwrap();
        let created = upsert_survey(&pool, "s-1", "ws-1", "Entry survey").await.unwrap();
        assert_eq!(created.workspace_id, "ws-1");

        let updated = upsert_survey(&pool, "s-1", "ws-2", "Renamed").await.unwrap();
        assert_eq!(updated.workspace_id, "ws-2");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_unknown_survey_is_none() {
        let pool = init_memory_database().await.unwrap();
        assert!(get_survey(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_workspace_rejected() {
        let pool = init_memory_database().await.unwrap();
        let err = upsert_survey(&pool, "s-1", " ", "t").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
