//! Engine configuration from YAML

use crate::core::context::DEFAULT_MAX_SUBSTITUTION_PASSES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings of the engine, independent of any template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on nested parameter substitutions
    pub max_substitution_passes: usize,

    /// How long a timed-out resource waits for in-flight work before teardown
    pub teardown_grace_secs: u64,

    /// Name of the file receiving captured command output
    pub capture_file: String,

    /// Runs allowed in flight at once
    pub max_concurrent_runs: usize,

    /// Where local compute instances get their working directories
    pub work_root: PathBuf,

    /// Root of the local object store (`s3://bucket/key` maps to `<root>/bucket/key`)
    pub store_root: PathBuf,

    /// Shell used to run activity commands
    pub shell: String,

    /// Run archive database; `None` keeps history in memory only
    pub history_db: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pipelayer");
        Self {
            max_substitution_passes: DEFAULT_MAX_SUBSTITUTION_PASSES,
            teardown_grace_secs: 30,
            capture_file: "stdout.log".to_string(),
            max_concurrent_runs: 4,
            work_root: std::env::temp_dir().join("pipelayer-work"),
            store_root: data_dir.join("store"),
            shell: "sh".to_string(),
            history_db: Some(data_dir.join("history.db")),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_substitution_passes == 0 {
            anyhow::bail!("max_substitution_passes must be at least 1");
        }
        if self.max_concurrent_runs == 0 {
            anyhow::bail!("max_concurrent_runs must be at least 1");
        }
        if self.capture_file.trim().is_empty() || self.capture_file.contains('/') {
            anyhow::bail!("capture_file must be a plain file name, got '{}'", self.capture_file);
        }
        if self.shell.trim().is_empty() {
            anyhow::bail!("shell must not be empty");
        }
        Ok(())
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.teardown_grace_secs)
    }
}
