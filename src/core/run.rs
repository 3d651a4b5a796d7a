//! Run instances - one materialisation of the pipeline per scheduled instant

use crate::core::error::{FailureKind, RunError};
use crate::core::graph::ObjectId;
use crate::core::object::{ObjectType, PipelineObject};
use crate::core::pipeline::Pipeline;
use crate::core::state::{ObjectStatus, RunOutcome, RunPhase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Per-object state within a run
#[derive(Debug, Clone, Serialize)]
pub struct ObjectRecord {
    pub id: String,
    pub object_type: ObjectType,
    pub status: ObjectStatus,
    /// Evaluated copy of the object, once evaluation succeeded
    pub evaluated: Option<PipelineObject>,
    pub error: Option<RunError>,
    pub attempts: u32,
    /// Captured output reference (activities) or instance id (resources)
    pub artifact: Option<String>,
}

/// A phase transition
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseChange {
    pub phase: RunPhase,
    pub at: DateTime<Utc>,
}

/// One run of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RunInstance {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub scheduled_start: DateTime<Utc>,
    pub phase: RunPhase,
    pub phase_history: Vec<PhaseChange>,
    pub outcome: Option<RunOutcome>,
    /// Indexed by `ObjectId`
    objects: Vec<ObjectRecord>,
    /// Resolved output location of the activity, if any
    pub output_location: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunInstance {
    pub fn new(pipeline: &Pipeline, scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let objects = pipeline
            .objects()
            .iter()
            .map(|object| ObjectRecord {
                id: object.id.clone(),
                object_type: object.object_type,
                status: ObjectStatus::Pending,
                evaluated: None,
                error: None,
                attempts: 0,
                artifact: None,
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            pipeline_name: pipeline.name.clone(),
            scheduled_start,
            phase: RunPhase::Scheduled,
            phase_history: vec![PhaseChange {
                phase: RunPhase::Scheduled,
                at: now,
            }],
            outcome: None,
            objects,
            output_location: None,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn record(&self, id: ObjectId) -> &ObjectRecord {
        &self.objects[id.index()]
    }

    pub fn record_mut(&mut self, id: ObjectId) -> &mut ObjectRecord {
        &mut self.objects[id.index()]
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.objects
    }

    /// Status by template id
    pub fn status(&self, id: &str) -> Option<ObjectStatus> {
        self.objects.iter().find(|r| r.id == id).map(|r| r.status)
    }

    /// Error attached to an object, by template id
    pub fn error(&self, id: &str) -> Option<&RunError> {
        self.objects
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.error.as_ref())
    }

    pub fn set_status(&mut self, id: ObjectId, status: ObjectStatus) {
        self.objects[id.index()].status = status;
    }

    /// Mark an object failed and attach the error
    pub fn fail_object(&mut self, id: ObjectId, error: RunError) {
        let record = &mut self.objects[id.index()];
        record.status = ObjectStatus::Failed;
        record.error = Some(error);
    }

    pub fn enter_phase(&mut self, phase: RunPhase, at: DateTime<Utc>) {
        self.phase = phase;
        self.phase_history.push(PhaseChange { phase, at });
    }

    /// Kind of the first failure recorded, in arena order
    pub fn first_failure(&self) -> Option<FailureKind> {
        self.objects
            .iter()
            .filter(|r| r.status == ObjectStatus::Failed)
            .find_map(|r| r.error.as_ref().map(|e| e.kind))
    }

    pub fn has_failures(&self) -> bool {
        self.objects.iter().any(|r| r.status == ObjectStatus::Failed)
    }

    pub fn is_complete(&self) -> bool {
        self.objects.iter().all(|r| r.status.is_terminal())
    }

    /// Settle the outcome and stamp completion
    pub fn finish(&mut self, failure: Option<FailureKind>, at: DateTime<Utc>) {
        let outcome = match failure.or_else(|| self.first_failure()) {
            Some(reason) => RunOutcome::Failed { reason },
            None => RunOutcome::Succeeded,
        };
        self.outcome = Some(outcome);
        self.completed_at = Some(at);
    }

    /// Phases visited, in order
    pub fn phases(&self) -> Vec<RunPhase> {
        self.phase_history.iter().map(|c| c.phase).collect()
    }
}
