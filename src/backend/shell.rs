//! Shell command executor - runs activity commands through `sh -c`

use crate::backend::{BackendError, CommandExecutor, CommandOutput};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands in a local shell
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    /// Shell executable (e.g. "sh", "/bin/bash")
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    /// Execute `command` with `working_dir` as the current directory
    ///
    /// The child is killed if the returned future is dropped, so cancelling
    /// the caller stops the process.
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, BackendError> {
        debug!("Spawning {} in {}: {}", self.shell, working_dir.display(), command);

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Internal(format!("Failed to spawn {}: {}", self.shell, e)))?;

        // Killed by a signal has no code
        let exit_code = output.status.code().unwrap_or(-1);
        let mut capture = String::from_utf8_lossy(&output.stdout).into_owned();
        capture.push_str(&String::from_utf8_lossy(&output.stderr));

        if exit_code != 0 {
            warn!("command exited with code {}", exit_code);
        }
        debug!("command produced {} bytes of output", capture.len());

        Ok(CommandOutput { exit_code, capture })
    }
}
