//! SQLite-based run archive

use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const COLUMNS: &str =
    "id, pipeline_name, scheduled_start, outcome, started_at, completed_at, output_location, objects";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open a store at `path`, creating its directory if needed
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let path = path
            .to_str()
            .with_context(|| format!("Database path is not UTF-8: {}", path.display()))?;
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline_name TEXT NOT NULL,
                scheduled_start TEXT NOT NULL,
                outcome TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                output_location TEXT,
                objects TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON runs(pipeline_name);
            CREATE INDEX IF NOT EXISTS idx_scheduled_start ON runs(scheduled_start);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_name: row.get("pipeline_name"),
            scheduled_start: Self::from_naive(row.get("scheduled_start")),
            outcome: serde_json::from_str(&row.get::<String, _>("outcome"))
                .context("Corrupt outcome column")?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            output_location: row.get("output_location"),
            objects: serde_json::from_str(&row.get::<String, _>("objects"))
                .context("Corrupt objects column")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline_name, scheduled_start, outcome, started_at, completed_at, output_location, objects)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline_name)
        .bind(Self::to_naive(run.scheduled_start))
        .bind(serde_json::to_string(&run.outcome)?)
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(&run.output_location)
        .bind(serde_json::to_string(&run.objects)?)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_name = ?1 ORDER BY scheduled_start DESC",
            COLUMNS
        ))
        .bind(pipeline_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM runs
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FailureKind;
    use crate::core::state::{ObjectStatus, RunOutcome};
    use crate::persistence::tests::summary;

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteRunStore::new(":memory:").await.unwrap();
        let failed = summary(
            "line-count",
            4,
            RunOutcome::Failed {
                reason: FailureKind::CommandExecution,
            },
        );

        store.save_run(&failed).await.unwrap();

        let loaded = store.load_run(failed.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.pipeline_name, failed.pipeline_name);
        assert_eq!(loaded.outcome, failed.outcome);
        assert_eq!(loaded.scheduled_start, failed.scheduled_start);
        assert_eq!(loaded.objects[0].status, ObjectStatus::Failed);
        assert_eq!(
            loaded.objects[0].error.as_ref().map(|e| e.kind),
            Some(FailureKind::CommandExecution)
        );
        assert!(store.load_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_latest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRunStore::open(&dir.path().join("nested/history.db"))
            .await
            .unwrap();
        for hour in [1, 3, 2] {
            store
                .save_run(&summary("line-count", hour, RunOutcome::Succeeded))
                .await
                .unwrap();
        }

        let runs = store.list_runs("line-count").await.unwrap();
        let hours: Vec<u32> = runs
            .iter()
            .map(|r| chrono::Timelike::hour(&r.scheduled_start))
            .collect();
        assert_eq!(hours, vec![3, 2, 1]);
        assert_eq!(store.list_pipelines().await.unwrap(), vec!["line-count"]);
    }
}
