//! CLI output formatting

use crate::core::state::{ObjectStatus, RunOutcome, RunPhase};
use crate::execution::RunEvent;
use crate::persistence::RunSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Spinner shown while a single run is in flight
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an object status for display
pub fn format_object_status(status: ObjectStatus) -> String {
    let label = status.to_string();
    match status {
        ObjectStatus::Pending => style(label).dim().to_string(),
        ObjectStatus::Running => style(label).yellow().to_string(),
        ObjectStatus::Succeeded => style(label).green().to_string(),
        ObjectStatus::Failed => style(label).red().to_string(),
        ObjectStatus::CascadeCancelled => style(label).magenta().to_string(),
    }
}

/// Format a run outcome for display
pub fn format_outcome(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Succeeded => style("SUCCEEDED").green().to_string(),
        RunOutcome::Failed { reason } => style(format!("FAILED ({:?})", reason)).red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run event for display
pub fn format_run_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted {
            run_id,
            pipeline_name,
            scheduled_start,
        } => format!(
            "{} Starting {} for {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(scheduled_start.to_rfc3339()).cyan(),
            style(short_id(run_id)).dim()
        ),
        RunEvent::PhaseChanged { run_id, phase } => {
            let phase = match phase {
                RunPhase::Failed => style(phase.to_string()).red(),
                RunPhase::Succeeded => style(phase.to_string()).green(),
                _ => style(phase.to_string()).dim(),
            };
            format!("{} {} {}", INFO, style(short_id(run_id)).dim(), phase)
        }
        RunEvent::ObjectStatusChanged {
            object,
            status,
            error,
            ..
        } => {
            let icon = match status {
                ObjectStatus::Succeeded => CHECK,
                ObjectStatus::Failed => CROSS,
                ObjectStatus::CascadeCancelled => WARN,
                _ => SPINNER,
            };
            match error {
                Some(error) => format!(
                    "{} {} {}: {}",
                    icon,
                    style(object).cyan(),
                    format_object_status(*status),
                    style(error).dim()
                ),
                None => format!(
                    "{} {} {}",
                    icon,
                    style(object).cyan(),
                    format_object_status(*status)
                ),
            }
        }
        RunEvent::ResourceProvisioned {
            object, instance_id, ..
        } => format!(
            "{} {} provisioned as {}",
            INFO,
            style(object).cyan(),
            style(instance_id).dim()
        ),
        RunEvent::ResourceTornDown {
            object, instance_id, ..
        } => format!(
            "{} {} ({}) torn down",
            INFO,
            style(object).cyan(),
            style(instance_id).dim()
        ),
        RunEvent::RunFinished { run_id, outcome } => format!(
            "{} Run {} {}",
            if outcome.is_success() { CHECK } else { CROSS },
            style(short_id(run_id)).dim(),
            format_outcome(*outcome)
        ),
    }
}

/// One history line for a run
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = if summary.outcome.is_success() { CHECK } else { CROSS };
    format!(
        "{} {} - {} - {} - {}",
        icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline_name).bold(),
        style(summary.scheduled_start.to_rfc3339()).cyan(),
        format_outcome(summary.outcome)
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
