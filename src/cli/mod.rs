//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, UploadCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Scheduled pipeline-template runner
#[derive(Debug, Parser, Clone)]
#[command(name = "pipelayer")]
#[command(version)]
#[command(
    about = "Runs pipeline templates on a schedule against pluggable backends",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run pipelines on their schedules
    Run(RunCommand),

    /// Validate a template against every pipeline's values
    Validate(ValidateCommand),

    /// Upload each pipeline directory to its input location
    Upload(UploadCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
