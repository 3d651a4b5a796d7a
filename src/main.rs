use anyhow::{Context, Result};
use chrono::Utc;
use pipelayer::backend::{Backends, LocalObjectStore, ObjectStore};
use pipelayer::cli::commands::{HistoryCommand, RunCommand, UploadCommand, ValidateCommand};
use pipelayer::cli::output::*;
use pipelayer::cli::{Cli, Command};
use pipelayer::core::period::parse_datetime;
use pipelayer::core::{EngineConfig, ObjectStatus, PipelineSet, RunInstance, Validation, Value};
use pipelayer::execution::{run_all, PipelineScheduler, RunCoordinator};
use pipelayer::persistence::{PersistenceBackend, RunSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let ok = match &cli.command {
        Command::Run(cmd) => run_pipelines(cmd, &config).await?,
        Command::Validate(cmd) => validate_pipelines(cmd, &config)?,
        Command::Upload(cmd) => upload_directories(cmd, &config).await?,
        Command::History(cmd) => show_history(cmd, &config).await?,
    };
    if !ok {
        std::process::exit(1);
    }

    Ok(())
}

fn load_pipelines(
    template: &Path,
    sources: &[PathBuf],
    overrides: &[(String, String)],
) -> Result<PipelineSet> {
    let mut set = PipelineSet::from_template(template)
        .with_context(|| format!("Failed to load template {}", template.display()))?;
    for source in sources {
        let entry = set
            .add_pipeline(source, overrides)
            .with_context(|| format!("Failed to load pipeline {}", source.display()))?;
        println!("{} Loaded pipeline: {}", INFO, style(&entry.pipeline.name).bold());
    }
    for (key, value) in overrides {
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
    Ok(set)
}

/// Print every failed validation; true when all pipelines are valid
fn report_validation(validations: &[Validation]) -> bool {
    for validation in validations.iter().filter(|v| !v.is_valid()) {
        println!(
            "{} {} failed validation:",
            CROSS,
            style(&validation.pipeline_name).bold()
        );
        for (object, message) in &validation.errors {
            println!("  {}: {}", style(object).cyan(), style(message).red());
        }
    }
    validations.iter().all(Validation::is_valid)
}

#[cfg(feature = "sqlite")]
async fn open_history(config: &EngineConfig) -> Result<Arc<dyn PersistenceBackend>> {
    use pipelayer::persistence::{InMemoryPersistence, SqliteRunStore};
    Ok(match &config.history_db {
        Some(path) => Arc::new(SqliteRunStore::open(path).await?),
        None => Arc::new(InMemoryPersistence::new()),
    })
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_config: &EngineConfig) -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(pipelayer::persistence::InMemoryPersistence::new()))
}

async fn run_pipelines(cmd: &RunCommand, config: &EngineConfig) -> Result<bool> {
    let set = load_pipelines(&cmd.template, &cmd.values, &cmd.param)?;
    if !report_validation(&set.validate(Utc::now(), config.max_substitution_passes)) {
        error!("Not running pipelines due to validation errors");
        return Ok(false);
    }

    let archive = if cmd.no_history {
        None
    } else {
        Some(open_history(config).await?)
    };

    let coordinator = Arc::new(RunCoordinator::new(Backends::local(config), config));

    let mut ok = true;
    let mut finished = 0;
    match &cmd.at {
        Some(at) => {
            let instant = parse_datetime(at).with_context(|| format!("Invalid instant '{}'", at))?;
            let spinner =
                create_spinner(format!("{} pipeline(s) @ {}", set.len(), instant.to_rfc3339()));
            let printer = spinner.clone();
            coordinator.add_event_handler(move |event| printer.println(format_run_event(&event)));

            let mut runs = Vec::with_capacity(set.len());
            for pipeline in set.pipelines() {
                let run = coordinator.execute(Arc::clone(pipeline), instant).await;
                if let (Some(archive), Some(summary)) = (&archive, RunSummary::from_run(&run)) {
                    archive.save_run(&summary).await?;
                }
                runs.push(run);
            }
            spinner.finish_and_clear();

            println!();
            for run in &runs {
                ok &= print_run_result(run);
            }
            finished = runs.len();
        }
        None => {
            coordinator.add_event_handler(|event| println!("{}", format_run_event(&event)));
            let shutdown = CancellationToken::new();
            let interrupt = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, waiting for runs in flight");
                    interrupt.cancel();
                }
            });

            let limit = Arc::new(Semaphore::new(config.max_concurrent_runs));
            let schedulers = set
                .pipelines()
                .map(|pipeline| {
                    let scheduler = PipelineScheduler::new(
                        Arc::clone(&coordinator),
                        Arc::clone(pipeline),
                        config,
                    )
                    .with_limit(Arc::clone(&limit));
                    match &archive {
                        Some(archive) => scheduler.with_archive(Arc::clone(archive)),
                        None => scheduler,
                    }
                })
                .collect();
            let reports = run_all(schedulers, cmd.occurrences, shutdown).await?;

            println!();
            for report in &reports {
                for run in &report.runs {
                    ok &= print_run_result(run);
                }
                ok &= report.failed == 0;
                finished += report.fired;
                println!(
                    "{} {}: {} run(s), {} failed",
                    INFO,
                    style(&report.pipeline_name).bold(),
                    report.fired,
                    report.failed
                );
            }
        }
    }

    if archive.is_some() && finished > 0 {
        println!("{} {} run(s) saved to history", INFO, finished);
    }
    Ok(ok)
}

fn print_run_result(run: &RunInstance) -> bool {
    let Some(outcome) = run.outcome else {
        warn!(run_id = %run.run_id, "Run did not finish");
        return false;
    };
    if outcome.is_success() {
        println!(
            "{} {} @ {} completed {}",
            CHECK,
            style(&run.pipeline_name).bold(),
            style(run.scheduled_start.to_rfc3339()).cyan(),
            style("successfully").green()
        );
        if let Some(location) = &run.output_location {
            println!("  Output: {}", style(location).dim());
        }
    } else {
        println!(
            "{} {} @ {} {}",
            CROSS,
            style(&run.pipeline_name).bold(),
            style(run.scheduled_start.to_rfc3339()).cyan(),
            format_outcome(outcome)
        );
        for record in run.records() {
            if let Some(e) = &record.error {
                error!(object = %record.id, "{}", e);
            }
        }
    }
    outcome.is_success()
}

fn validate_pipelines(cmd: &ValidateCommand, config: &EngineConfig) -> Result<bool> {
    println!("{} Validating pipelines...", INFO);

    let set = match load_pipelines(&cmd.template, &cmd.values, &cmd.param) {
        Ok(set) => set,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            return Ok(false);
        }
    };

    let validations = set.validate(Utc::now(), config.max_substitution_passes);
    if !report_validation(&validations) {
        return Ok(false);
    }

    for (validation, pipeline) in validations.iter().zip(set.pipelines()) {
        println!("{} {} is valid", CHECK, style(&validation.pipeline_name).bold());
        println!("  Objects: {}", style(validation.evaluated.len()).cyan());
        println!("  Rerun policy: {:?}", pipeline.rerun_policy());
        if let Some(instant) = validation.instant {
            if validation.schedule_exhausted {
                println!("  {} Schedule has no future instants; evaluated its start", WARN);
            }
            println!("  Next run: {}", style(instant.to_rfc3339()).cyan());
        }
    }

    if cmd.json {
        let mut evaluated = serde_json::Map::new();
        for validation in &validations {
            evaluated.insert(
                validation.pipeline_name.clone(),
                serde_json::to_value(&validation.evaluated)?,
            );
        }
        println!("\n{}", serde_json::to_string_pretty(&evaluated)?);
    }
    Ok(true)
}

async fn upload_directories(cmd: &UploadCommand, config: &EngineConfig) -> Result<bool> {
    let set = load_pipelines(&cmd.template, &cmd.values, &cmd.param)?;
    let passes = config.max_substitution_passes;
    if !report_validation(&set.validate(Utc::now(), passes)) {
        error!("Not uploading pipelines due to validation errors");
        return Ok(false);
    }

    let store = LocalObjectStore::new(&config.store_root);
    for entry in set.entries() {
        let name = &entry.pipeline.name;
        let destination = match entry.pipeline.parameter_value(&cmd.key, passes) {
            Ok(Value::List(_)) => {
                anyhow::bail!("{}: '{}' holds a list, not a location", name, cmd.key)
            }
            Ok(value) => value.to_string(),
            Err(e) => anyhow::bail!("{}: cannot resolve '{}': {}", name, cmd.key, e),
        };
        store
            .upload_directory(&entry.dir, &destination)
            .await
            .with_context(|| {
                format!("Failed to upload {} to {}", entry.dir.display(), destination)
            })?;
        println!(
            "{} Uploaded {} to {}",
            CHECK,
            style(entry.dir.display()).bold(),
            style(&destination).cyan()
        );
    }
    Ok(true)
}

async fn show_history(cmd: &HistoryCommand, config: &EngineConfig) -> Result<bool> {
    let store = open_history(config).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(true);
    }

    let runs = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_runs(pipeline_name).await?
    } else {
        let mut all_runs = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all_runs.extend(store.list_runs(&pipeline).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(true);
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }
    Ok(true)
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Scheduled: {}", style(summary.scheduled_start.to_rfc3339()).cyan());
    println!("  Outcome: {}", format_outcome(summary.outcome));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    if let Some(location) = &summary.output_location {
        println!("  Output: {}", style(location).dim());
    }
    for object in &summary.objects {
        let marker = if object.status == ObjectStatus::Failed { CROSS } else { INFO };
        println!(
            "  {}{} {}",
            marker,
            style(&object.id).cyan(),
            format_object_status(object.status)
        );
        if let Some(e) = &object.error {
            println!("      {}", style(e).dim());
        }
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
