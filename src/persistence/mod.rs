//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::error::RunError;
use crate::core::object::ObjectType;
use crate::core::run::RunInstance;
use crate::core::state::{ObjectStatus, RunOutcome};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Final state of one object in an archived run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: String,
    pub object_type: ObjectType,
    pub status: ObjectStatus,
    #[serde(default)]
    pub error: Option<RunError>,
    #[serde(default)]
    pub attempts: u32,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Instant the run was scheduled for
    pub scheduled_start: DateTime<Utc>,

    pub outcome: RunOutcome,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Where the activity's output was staged
    pub output_location: Option<String>,

    /// Per-object statuses and errors
    pub objects: Vec<ObjectSummary>,
}

impl RunSummary {
    /// Summarise a run; a run without an outcome has not finished
    pub fn from_run(run: &RunInstance) -> Option<Self> {
        Some(Self {
            run_id: run.run_id,
            pipeline_name: run.pipeline_name.clone(),
            scheduled_start: run.scheduled_start,
            outcome: run.outcome?,
            started_at: run.started_at,
            completed_at: run.completed_at,
            output_location: run.output_location.clone(),
            objects: run
                .records()
                .iter()
                .map(|record| ObjectSummary {
                    id: record.id.clone(),
                    object_type: record.object_type,
                    status: record.status,
                    error: record.error.clone(),
                    attempts: record.attempts,
                })
                .collect(),
        })
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, latest scheduled instant first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.scheduled_start.cmp(&a.scheduled_start));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|run| run.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::error::FailureKind;
    use chrono::TimeZone;

    pub(crate) fn summary(pipeline: &str, hour: u32, outcome: RunOutcome) -> RunSummary {
        let scheduled = Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap();
        RunSummary {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline.to_string(),
            scheduled_start: scheduled,
            outcome,
            started_at: scheduled,
            completed_at: Some(scheduled + chrono::Duration::minutes(3)),
            output_location: Some(format!("s3://bucket/out/2024-01-01_{:02}0000", hour)),
            objects: vec![ObjectSummary {
                id: "ShellCommandActivityObj".into(),
                object_type: ObjectType::ShellCommandActivity,
                status: if outcome.is_success() {
                    ObjectStatus::Succeeded
                } else {
                    ObjectStatus::Failed
                },
                error: (!outcome.is_success())
                    .then(|| RunError::new(FailureKind::CommandExecution, "exit status 1")),
                attempts: 1,
            }],
        }
    }

    #[tokio::test]
    async fn test_in_memory_history() {
        let store = InMemoryPersistence::new();
        let early = summary("line-count", 1, RunOutcome::Succeeded);
        let late = summary(
            "line-count",
            2,
            RunOutcome::Failed {
                reason: FailureKind::CommandExecution,
            },
        );
        store.save_run(&early).await.unwrap();
        store.save_run(&late).await.unwrap();
        store.save_run(&summary("other", 1, RunOutcome::Succeeded)).await.unwrap();

        let runs = store.list_runs("line-count").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, late.run_id);
        assert_eq!(store.list_pipelines().await.unwrap(), vec!["line-count", "other"]);
        assert_eq!(
            store.load_run(early.run_id).await.unwrap().unwrap().objects[0].status,
            ObjectStatus::Succeeded
        );
    }
}
