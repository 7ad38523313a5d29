//! Database layer for the submission tracker
//!
//! Two tables: `surveys` (the registry start calls validate against) and
//! `submissions` (one row per respondent attempt). Terminal transitions are
//! conditional UPDATEs so concurrent complete/abandon calls never need a lock.

use csp_common::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub mod submissions;
pub mod surveys;

pub use submissions::SubmissionStore;

/// Open (creating if needed) the tracker database and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!(path = %db_path.display(), "Initialized new tracker database");
    } else {
        info!(path = %db_path.display(), "Opened existing tracker database");
    }

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database (every connection would otherwise see its own empty db)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create tables if missing (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS surveys (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL REFERENCES surveys(id),
            workspace_id TEXT NOT NULL,
            respondent_name TEXT NOT NULL,
            respondent_email TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL CHECK (status IN ('started', 'completed', 'abandoned')),
            started_at TEXT NOT NULL,
            completed_at TEXT,
            completion_time_seconds INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_survey ON submissions(survey_id, started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
