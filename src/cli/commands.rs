//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run pipelines
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the pipeline template (JSON)
    #[arg(short, long)]
    pub template: PathBuf,

    /// Pipeline directory or values file; repeat for several pipelines
    #[arg(long, required = true)]
    pub values: Vec<PathBuf>,

    /// Parameter value overrides (id=value)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Run once for this instant instead of following the schedule
    #[arg(long)]
    pub at: Option<String>,

    /// Stop after this many runs
    #[arg(long)]
    pub occurrences: Option<usize>,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate pipelines built from one template
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline template (JSON)
    #[arg(short, long)]
    pub template: PathBuf,

    /// Pipeline directory or values file; repeat for several pipelines
    #[arg(long, required = true)]
    pub values: Vec<PathBuf>,

    /// Parameter value overrides (id=value)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Print the evaluated objects as JSON
    #[arg(long)]
    pub json: bool,
}

/// Upload pipeline directories
#[derive(Debug, Args, Clone)]
pub struct UploadCommand {
    /// Path to the pipeline template (JSON)
    #[arg(short, long)]
    pub template: PathBuf,

    /// Pipeline directory or values file; repeat for several pipelines
    #[arg(long, required = true)]
    pub values: Vec<PathBuf>,

    /// Parameter value overrides (id=value)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Parameter holding the destination location
    #[arg(long, default_value = "myS3InputDir")]
    pub key: String,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
