//! Trigger loop - fires one run per due instant of the pipeline's schedule

use crate::core::config::EngineConfig;
use crate::core::pipeline::Pipeline;
use crate::core::run::RunInstance;
use crate::execution::coordinator::RunCoordinator;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one trigger loop fired
#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub pipeline_name: String,
    pub fired: usize,
    pub failed: usize,
    /// Finished runs by scheduled instant, kept only when the loop was bounded
    pub runs: Vec<RunInstance>,
}

impl SchedulerReport {
    fn settle(&mut self, joined: Result<RunInstance, JoinError>, keep: bool) {
        match joined {
            Ok(run) => {
                if !run.outcome.is_some_and(|outcome| outcome.is_success()) {
                    self.failed += 1;
                }
                if keep {
                    self.runs.push(run);
                }
            }
            Err(e) => {
                self.failed += 1;
                warn!("Run task failed: {}", e);
            }
        }
    }
}

/// Fires runs of one pipeline as its schedule comes due
pub struct PipelineScheduler {
    coordinator: Arc<RunCoordinator>,
    pipeline: Arc<Pipeline>,
    max_passes: usize,
    limit: Arc<Semaphore>,
    archive: Option<Arc<dyn PersistenceBackend>>,
}

impl PipelineScheduler {
    pub fn new(
        coordinator: Arc<RunCoordinator>,
        pipeline: Arc<Pipeline>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            coordinator,
            pipeline,
            max_passes: config.max_substitution_passes,
            limit: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            archive: None,
        }
    }

    /// Archive every finished run
    pub fn with_archive(mut self, archive: Arc<dyn PersistenceBackend>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Share a run limit with other schedulers
    pub fn with_limit(mut self, limit: Arc<Semaphore>) -> Self {
        self.limit = limit;
        self
    }

    /// Fire runs until the schedule is exhausted, `max_runs` have fired or
    /// `shutdown` is cancelled, then wait for the runs in flight
    ///
    /// Finished runs are reaped as the loop goes. An unbounded loop only
    /// counts them; a bounded one also returns them.
    pub async fn run(
        &self,
        max_runs: Option<usize>,
        shutdown: CancellationToken,
    ) -> Result<SchedulerReport> {
        let mut schedule = self
            .pipeline
            .schedule(self.max_passes)
            .context("Failed to resolve the pipeline schedule")?;
        let clock = self.coordinator.clock();
        let keep = max_runs.is_some();
        let mut report = SchedulerReport {
            pipeline_name: self.pipeline.name.clone(),
            ..SchedulerReport::default()
        };
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                report.settle(joined, keep);
            }
            if max_runs.is_some_and(|max| report.fired >= max) {
                break;
            }
            let Some(due) = schedule.next_due(clock.now())? else {
                info!("Schedule of {} exhausted", self.pipeline.name);
                break;
            };
            debug!("Next run of {} due at {}", self.pipeline.name, due);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = clock.sleep_until(due) => {}
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.limit).acquire_owned() => {
                    permit.context("Run limiter closed")?
                }
            };
            schedule.fire(due);
            report.fired += 1;

            let coordinator = Arc::clone(&self.coordinator);
            let pipeline = Arc::clone(&self.pipeline);
            let archive = self.archive.clone();
            in_flight.spawn(async move {
                let run = coordinator.execute(pipeline, due).await;
                drop(permit);
                if let (Some(archive), Some(summary)) = (archive, RunSummary::from_run(&run)) {
                    if let Err(e) = archive.save_run(&summary).await {
                        warn!(run_id = %run.run_id, "Failed to archive run: {:#}", e);
                    }
                }
                run
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            report.settle(joined, keep);
        }
        report.runs.sort_by_key(|run| run.scheduled_start);
        Ok(report)
    }
}

/// Drive several pipelines' trigger loops side by side
///
/// Reports come back in the order the schedulers were given.
pub async fn run_all(
    schedulers: Vec<PipelineScheduler>,
    max_runs: Option<usize>,
    shutdown: CancellationToken,
) -> Result<Vec<SchedulerReport>> {
    let mut loops = JoinSet::new();
    let count = schedulers.len();
    for (index, scheduler) in schedulers.into_iter().enumerate() {
        let shutdown = shutdown.clone();
        loops.spawn(async move { (index, scheduler.run(max_runs, shutdown).await) });
    }

    let mut reports: Vec<Option<SchedulerReport>> = (0..count).map(|_| None).collect();
    while let Some(joined) = loops.join_next().await {
        let (index, report) = joined.context("Trigger loop panicked")?;
        reports[index] = Some(report?);
    }
    Ok(reports.into_iter().flatten().collect())
}
