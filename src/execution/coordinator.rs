//! Run coordinator - drives one run from evaluation to teardown

use crate::backend::{Backends, Clock};
use crate::core::config::EngineConfig;
use crate::core::error::{FailureKind, RunError};
use crate::core::evaluator::Value;
use crate::core::graph::ObjectId;
use crate::core::object::{ObjectType, PipelineObject};
use crate::core::pipeline::Pipeline;
use crate::core::run::RunInstance;
use crate::core::state::{ObjectStatus, RunOutcome, RunPhase};
use crate::execution::activity::{ActivityError, ActivityRunner, ActivitySpec};
use crate::execution::cascade::{cascade_failure, rerun_set};
use crate::execution::lifecycle::{ResourceHandle, ResourceManager, ResourceSpec};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        scheduled_start: DateTime<Utc>,
    },
    PhaseChanged {
        run_id: Uuid,
        phase: RunPhase,
    },
    ObjectStatusChanged {
        run_id: Uuid,
        object: String,
        status: ObjectStatus,
        error: Option<RunError>,
    },
    ResourceProvisioned {
        run_id: Uuid,
        object: String,
        instance_id: String,
    },
    ResourceTornDown {
        run_id: Uuid,
        object: String,
        instance_id: String,
    },
    RunFinished {
        run_id: Uuid,
        outcome: RunOutcome,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Why a rerun was refused
#[derive(Debug, Error)]
pub enum RerunError {
    #[error("pipeline has no object '{0}'")]
    UnknownObject(String),

    #[error("run {0} has not finished")]
    InProgress(Uuid),
}

struct PlannedActivity {
    id: ObjectId,
    spec: ActivitySpec,
    resource: ObjectId,
    data_nodes: Vec<ObjectId>,
}

#[derive(Default)]
struct Plan {
    activities: Vec<PlannedActivity>,
    resources: Vec<(ObjectId, ResourceSpec)>,
}

/// Executes runs of a pipeline against a set of collaborators
pub struct RunCoordinator {
    resources: ResourceManager,
    runner: ActivityRunner,
    clock: Arc<dyn Clock>,
    max_passes: usize,
    event_handlers: RwLock<Vec<EventHandler>>,
}

impl RunCoordinator {
    pub fn new(backends: Backends, config: &EngineConfig) -> Self {
        Self {
            resources: ResourceManager::new(backends.compute, config.teardown_grace()),
            runner: ActivityRunner::new(
                backends.store,
                backends.executor,
                config.capture_file.clone(),
            ),
            clock: backends.clock,
            max_passes: config.max_substitution_passes,
            event_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: RunEvent) {
        let handlers = self.event_handlers.read().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Execute one run for the instant `scheduled_start`
    ///
    /// Always returns a finished run: failures are recorded on the objects
    /// that raised them and every provisioned resource is torn down.
    pub async fn execute(
        &self,
        pipeline: Arc<Pipeline>,
        scheduled_start: DateTime<Utc>,
    ) -> RunInstance {
        let mut run = RunInstance::new(&pipeline, scheduled_start, self.clock.now());
        info!(
            run_id = %run.run_id,
            "Starting run of {} for {}",
            pipeline.name,
            scheduled_start
        );
        self.emit(RunEvent::RunStarted {
            run_id: run.run_id,
            pipeline_name: pipeline.name.clone(),
            scheduled_start,
        });

        self.drive(&pipeline, &mut run).await;
        run
    }

    /// Rerun an object of a finished run, as the pipeline's rerun policy allows
    ///
    /// Returns the ids of the objects that were reset and run again.
    pub async fn rerun(
        &self,
        pipeline: Arc<Pipeline>,
        run: &mut RunInstance,
        object: &str,
    ) -> Result<Vec<String>, RerunError> {
        if run.outcome.is_none() {
            return Err(RerunError::InProgress(run.run_id));
        }
        let target = pipeline
            .graph()
            .lookup(object)
            .ok_or_else(|| RerunError::UnknownObject(object.to_string()))?;

        let reset = rerun_set(pipeline.graph(), run, target, pipeline.rerun_policy());
        info!(
            run_id = %run.run_id,
            "Rerunning {} ({:?} policy, {} objects)",
            object,
            pipeline.rerun_policy(),
            reset.len()
        );
        for &id in &reset {
            let record = run.record_mut(id);
            record.error = None;
            record.evaluated = None;
            record.artifact = None;
            self.set_status(pipeline.graph().id(id), run, id, ObjectStatus::Pending);
        }
        run.outcome = None;
        run.completed_at = None;

        self.drive(&pipeline, run).await;
        Ok(reset
            .into_iter()
            .map(|id| pipeline.graph().id(id).to_string())
            .collect())
    }

    /// Work every pending object of `run` through to a terminal state
    async fn drive(&self, pipeline: &Pipeline, run: &mut RunInstance) {
        let mut handles: BTreeMap<ObjectId, ResourceHandle> = BTreeMap::new();

        let mut proceed = self.evaluate(pipeline, run);
        let plan = if proceed {
            let (plan, planned) = self.plan(pipeline, run);
            proceed = planned;
            plan
        } else {
            Plan::default()
        };

        if proceed {
            self.provision(pipeline, run, &plan, &mut handles).await;
            self.run_activities(pipeline, run, &plan, &mut handles).await;
        } else {
            warn!(run_id = %run.run_id, "Run aborted before provisioning");
        }

        self.settle(pipeline, run, !proceed);
        let phase = if run.has_failures() {
            RunPhase::Failed
        } else {
            RunPhase::Succeeded
        };
        self.enter_phase(run, phase);

        let remaining: Vec<ObjectId> = handles.keys().copied().collect();
        for id in remaining {
            self.release(pipeline, run, id, &mut handles).await;
        }

        run.finish(None, self.clock.now());
        self.enter_phase(run, RunPhase::TornDown);

        let outcome = run.outcome.unwrap_or(RunOutcome::Succeeded);
        info!(run_id = %run.run_id, "Run finished: {:?}", outcome);
        self.emit(RunEvent::RunFinished {
            run_id: run.run_id,
            outcome,
        });
    }

    /// Evaluate every pending object; `false` when anything failed
    fn evaluate(&self, pipeline: &Pipeline, run: &mut RunInstance) -> bool {
        self.enter_phase(run, RunPhase::Evaluating);
        let graph = pipeline.graph();

        let schedule = match pipeline.schedule(self.max_passes) {
            Ok(schedule) => schedule,
            Err(e) => {
                self.fail(pipeline, run, pipeline.schedule_object(), RunError::from(&e));
                return false;
            }
        };

        let mut context =
            pipeline.context_for(run.scheduled_start, schedule.period(), self.max_passes);
        context.set_runtime("actualStartTime", Value::Instant(self.clock.now()));
        context.set_runtime("runId", Value::Text(run.run_id.to_string()));

        let mut ok = true;
        for (object, result) in pipeline.objects().iter().zip(pipeline.evaluate(&context)) {
            let Some(id) = graph.lookup(&object.id) else {
                continue;
            };
            if run.record(id).status != ObjectStatus::Pending {
                continue;
            }
            match result {
                Ok(evaluated) => run.record_mut(id).evaluated = Some(evaluated),
                Err(e) => {
                    let kind = RunError::from(&e.error).kind;
                    self.fail(pipeline, run, id, RunError::new(kind, e.to_string()));
                    ok = false;
                }
            }
        }

        for &id in graph.execution_order() {
            let settled =
                matches!(graph.object_type(id), ObjectType::Default | ObjectType::Schedule);
            let record = run.record(id);
            if settled && record.status == ObjectStatus::Pending && record.evaluated.is_some() {
                self.set_status(graph.id(id), run, id, ObjectStatus::Succeeded);
            }
        }
        ok
    }

    fn evaluated<'r>(run: &'r RunInstance, id: Option<ObjectId>) -> Option<&'r PipelineObject> {
        id.and_then(|id| run.record(id).evaluated.as_ref())
    }

    /// Resolve activity and resource specs from the evaluated objects
    fn plan(&self, pipeline: &Pipeline, run: &mut RunInstance) -> (Plan, bool) {
        let graph = pipeline.graph();
        let mut plan = Plan::default();
        let mut ok = true;

        for id in graph.of_type(ObjectType::ShellCommandActivity) {
            if run.record(id).status != ObjectStatus::Pending {
                continue;
            }
            let Some(activity) = Self::evaluated(run, Some(id)).cloned() else {
                continue;
            };
            let link =
                |field: &str| activity.reference(field).and_then(|target| graph.lookup(target));
            let (Some(resource), input, output) = (link("runsOn"), link("input"), link("output"))
            else {
                continue;
            };

            let spec = match ActivitySpec::from_objects(
                &activity,
                Self::evaluated(run, input),
                Self::evaluated(run, output),
            ) {
                Ok(spec) => spec,
                Err(error) => {
                    self.fail(pipeline, run, id, error);
                    ok = false;
                    continue;
                }
            };
            if run.output_location.is_none() {
                run.output_location = spec.output.clone();
            }

            let already_planned = plan.resources.iter().any(|(r, _)| *r == resource);
            if !already_planned && run.record(resource).status == ObjectStatus::Pending {
                match Self::evaluated(run, Some(resource)).map(ResourceSpec::from_object) {
                    Some(Ok(resource_spec)) => plan.resources.push((resource, resource_spec)),
                    Some(Err(error)) => {
                        self.fail(pipeline, run, resource, error);
                        ok = false;
                        continue;
                    }
                    None => continue,
                }
            }

            plan.activities.push(PlannedActivity {
                id,
                spec,
                resource,
                data_nodes: input.into_iter().chain(output).collect(),
            });
        }
        (plan, ok)
    }

    async fn provision(
        &self,
        pipeline: &Pipeline,
        run: &mut RunInstance,
        plan: &Plan,
        handles: &mut BTreeMap<ObjectId, ResourceHandle>,
    ) {
        self.enter_phase(run, RunPhase::Provisioning);
        for (id, spec) in &plan.resources {
            let name = pipeline.graph().id(*id);
            self.set_status(name, run, *id, ObjectStatus::Running);
            match self.resources.provision(spec.clone(), run.run_id).await {
                Ok(handle) => {
                    let instance_id = handle.instance().instance_id.clone();
                    run.record_mut(*id).artifact = Some(instance_id.clone());
                    self.emit(RunEvent::ResourceProvisioned {
                        run_id: run.run_id,
                        object: name.to_string(),
                        instance_id,
                    });
                    handles.insert(*id, handle);
                }
                Err(e) => self.fail(pipeline, run, *id, RunError::from(&e)),
            }
        }
    }

    async fn run_activities(
        &self,
        pipeline: &Pipeline,
        run: &mut RunInstance,
        plan: &Plan,
        handles: &mut BTreeMap<ObjectId, ResourceHandle>,
    ) {
        self.enter_phase(run, RunPhase::Running);
        let graph = pipeline.graph();

        for (index, planned) in plan.activities.iter().enumerate() {
            let id = planned.id;
            if run.record(id).status != ObjectStatus::Pending {
                continue;
            }
            let blocked = graph
                .dependencies(id)
                .iter()
                .any(|dep| run.record(*dep).status.is_unsuccessful());
            let Some(handle) = handles.get(&planned.resource).cloned().filter(|_| !blocked) else {
                self.set_status(graph.id(id), run, id, ObjectStatus::CascadeCancelled);
                continue;
            };

            self.set_status(graph.id(id), run, id, ObjectStatus::Running);
            for &node in &planned.data_nodes {
                if run.record(node).status == ObjectStatus::Pending {
                    self.set_status(graph.id(node), run, node, ObjectStatus::Running);
                }
            }

            match self.runner.run(&planned.spec, &handle).await {
                Ok(result) => {
                    let record = run.record_mut(id);
                    record.attempts += result.attempts;
                    record.artifact = Some(result.capture.to_string());
                    debug!(
                        run_id = %run.run_id,
                        "{} captured output at {}", planned.spec.id, result.capture
                    );
                    self.set_status(graph.id(id), run, id, ObjectStatus::Succeeded);
                    for &node in &planned.data_nodes {
                        if run.record(node).status == ObjectStatus::Running {
                            self.set_status(graph.id(node), run, node, ObjectStatus::Succeeded);
                        }
                    }
                }
                Err(ActivityError::Cancelled) => {
                    let error = handle
                        .timeout_error()
                        .map(|e| RunError::from(&e))
                        .unwrap_or_else(|| {
                            RunError::new(FailureKind::ResourceTimeout, "resource deadline reached")
                        });
                    if run.record(planned.resource).status == ObjectStatus::Failed {
                        self.set_status(graph.id(id), run, id, ObjectStatus::CascadeCancelled);
                    } else {
                        self.fail(pipeline, run, planned.resource, error);
                    }
                }
                Err(e) => {
                    if let ActivityError::CommandExecution { attempts, .. } = &e {
                        run.record_mut(id).attempts += attempts;
                    }
                    let kind = e.failure_kind().unwrap_or(FailureKind::CommandExecution);
                    self.fail(pipeline, run, id, RunError::new(kind, e.to_string()));
                }
            }

            if run.record(id).status.is_unsuccessful() {
                for &node in &planned.data_nodes {
                    if run.record(node).status == ObjectStatus::Running {
                        self.set_status(graph.id(node), run, node, ObjectStatus::CascadeCancelled);
                    }
                }
            }

            // Release the resource once nothing left in the plan needs it
            let still_needed = plan.activities[index + 1..].iter().any(|later| {
                later.resource == planned.resource
                    && run.record(later.id).status == ObjectStatus::Pending
            });
            if !still_needed {
                self.release(pipeline, run, planned.resource, handles).await;
            }
        }
    }

    /// Tear a resource down and record the result on its object
    async fn release(
        &self,
        pipeline: &Pipeline,
        run: &mut RunInstance,
        id: ObjectId,
        handles: &mut BTreeMap<ObjectId, ResourceHandle>,
    ) {
        let Some(handle) = handles.remove(&id) else {
            return;
        };
        let name = pipeline.graph().id(id);
        match self.resources.teardown(&handle).await {
            Ok(()) => {
                if run.record(id).status == ObjectStatus::Running {
                    self.set_status(name, run, id, ObjectStatus::Succeeded);
                }
            }
            Err(e) => {
                if run.record(id).status != ObjectStatus::Failed {
                    self.fail(pipeline, run, id, RunError::from(&e));
                }
            }
        }
        self.emit(RunEvent::ResourceTornDown {
            run_id: run.run_id,
            object: name.to_string(),
            instance_id: handle.instance().instance_id.clone(),
        });
    }

    /// Give every object still pending a terminal status
    fn settle(&self, pipeline: &Pipeline, run: &mut RunInstance, aborted: bool) {
        let graph = pipeline.graph();
        for &id in graph.execution_order() {
            if run.record(id).status != ObjectStatus::Pending {
                continue;
            }
            let blocked = aborted
                || graph
                    .dependencies(id)
                    .iter()
                    .any(|dep| run.record(*dep).status.is_unsuccessful());
            let status = if blocked {
                ObjectStatus::CascadeCancelled
            } else {
                ObjectStatus::Succeeded
            };
            self.set_status(graph.id(id), run, id, status);
        }
    }

    /// Record a failure on `id` and cascade it
    fn fail(&self, pipeline: &Pipeline, run: &mut RunInstance, id: ObjectId, error: RunError) {
        let graph = pipeline.graph();
        warn!(run_id = %run.run_id, object = graph.id(id), "{}", error);
        run.fail_object(id, error.clone());
        self.emit(RunEvent::ObjectStatusChanged {
            run_id: run.run_id,
            object: graph.id(id).to_string(),
            status: ObjectStatus::Failed,
            error: Some(error),
        });

        for cancelled in cascade_failure(graph, run, id) {
            debug!(run_id = %run.run_id, object = graph.id(cancelled), "cascade cancelled");
            self.emit(RunEvent::ObjectStatusChanged {
                run_id: run.run_id,
                object: graph.id(cancelled).to_string(),
                status: ObjectStatus::CascadeCancelled,
                error: None,
            });
        }
    }

    fn set_status(&self, name: &str, run: &mut RunInstance, id: ObjectId, status: ObjectStatus) {
        run.set_status(id, status);
        self.emit(RunEvent::ObjectStatusChanged {
            run_id: run.run_id,
            object: name.to_string(),
            status,
            error: None,
        });
    }

    fn enter_phase(&self, run: &mut RunInstance, phase: RunPhase) {
        debug!(run_id = %run.run_id, "phase {}", phase);
        run.enter_phase(phase, self.clock.now());
        self.emit(RunEvent::PhaseChanged {
            run_id: run.run_id,
            phase,
        });
    }
}
