//! Activity runner - stage input, execute the command, stage output

use crate::backend::{BackendError, CommandExecutor, ObjectStore};
use crate::core::error::{FailureKind, RunError};
use crate::core::object::PipelineObject;
use crate::execution::lifecycle::ResourceHandle;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Placeholder replaced with the local input staging directory
pub const INPUT_STAGING_VAR: &str = "${INPUT1_STAGING_DIR}";

/// Placeholder replaced with the local output staging directory
pub const OUTPUT_STAGING_VAR: &str = "${OUTPUT1_STAGING_DIR}";

/// Which way data was moving when staging failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingDirection {
    Input,
    Output,
}

impl fmt::Display for StagingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingDirection::Input => f.write_str("input"),
            StagingDirection::Output => f.write_str("output"),
        }
    }
}

/// Error types for activity execution
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("failed to stage {direction} {location}: {source}")]
    Staging {
        direction: StagingDirection,
        location: String,
        #[source]
        source: BackendError,
    },

    #[error("command failed after {attempts} attempt(s): {reason}")]
    CommandExecution {
        exit_code: Option<i32>,
        reason: String,
        attempts: u32,
    },

    #[error("cancelled by the resource deadline")]
    Cancelled,
}

impl ActivityError {
    /// Failure kind recorded on the activity; `None` for cancellation,
    /// which is reported against the resource
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ActivityError::Staging { .. } => Some(FailureKind::Staging),
            ActivityError::CommandExecution { .. } => Some(FailureKind::CommandExecution),
            ActivityError::Cancelled => None,
        }
    }
}

/// An evaluated `ShellCommandActivity` with its data locations resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySpec {
    pub id: String,
    pub command: String,
    /// `directoryPath` of the input data node
    pub input: Option<String>,
    /// `directoryPath` of the output data node
    pub output: Option<String>,
    pub stage: bool,
    pub max_retries: u32,
}

impl ActivitySpec {
    /// Build from evaluated objects
    pub fn from_objects(
        activity: &PipelineObject,
        input: Option<&PipelineObject>,
        output: Option<&PipelineObject>,
    ) -> Result<Self, RunError> {
        let invalid = |field: &str, reason: String| {
            RunError::new(FailureKind::InvalidArgument, format!("{}: {}", field, reason))
        };

        let command = activity
            .text("command")
            .ok_or_else(|| invalid("command", "missing".to_string()))?
            .to_string();
        let stage = match activity.text("stage") {
            None => true,
            Some(flag) => match flag.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(invalid("stage", format!("'{}' is not true or false", flag))),
            },
        };
        let max_retries = match activity.text("maximumRetries") {
            None => 0,
            Some(n) => n
                .trim()
                .parse()
                .map_err(|_| invalid("maximumRetries", format!("'{}' is not a count", n)))?,
        };
        let location = |node: Option<&PipelineObject>| {
            node.and_then(|n| n.text("directoryPath"))
                .map(|path| path.trim_end_matches('/').to_string())
        };

        Ok(Self {
            id: activity.id.clone(),
            command,
            input: location(input),
            output: location(output),
            stage,
            max_retries,
        })
    }

    /// Command line with the staging placeholders replaced
    pub fn command_line(&self, input_dir: &Path, output_dir: &Path) -> String {
        self.command
            .replace(INPUT_STAGING_VAR, &input_dir.display().to_string())
            .replace(OUTPUT_STAGING_VAR, &output_dir.display().to_string())
    }
}

/// Where the captured command output ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRef {
    pub local: PathBuf,
    /// Object-store location, when output was staged
    pub remote: Option<String>,
}

impl fmt::Display for CaptureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(remote) => f.write_str(remote),
            None => write!(f, "{}", self.local.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityResult {
    pub exit_code: i32,
    pub capture: CaptureRef,
    pub attempts: u32,
}

/// Runs activities on provisioned resources
pub struct ActivityRunner {
    store: Arc<dyn ObjectStore>,
    executor: Arc<dyn CommandExecutor>,
    capture_file: String,
}

impl ActivityRunner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: Arc<dyn CommandExecutor>,
        capture_file: impl Into<String>,
    ) -> Self {
        Self {
            store,
            executor,
            capture_file: capture_file.into(),
        }
    }

    /// Run an activity; every step is raced against the resource deadline
    pub async fn run(
        &self,
        spec: &ActivitySpec,
        resource: &ResourceHandle,
    ) -> Result<ActivityResult, ActivityError> {
        let _work = resource.begin_work().await.ok_or(ActivityError::Cancelled)?;
        let deadline = resource.deadline();

        let dir = resource.instance().work_dir.join(&spec.id);
        let input_dir = dir.join("input");
        let output_dir = dir.join("output");
        for (path, direction) in [
            (&input_dir, StagingDirection::Input),
            (&output_dir, StagingDirection::Output),
        ] {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| ActivityError::Staging {
                    direction,
                    location: path.display().to_string(),
                    source: e.into(),
                })?;
        }

        if let (true, Some(input)) = (spec.stage, &spec.input) {
            info!("{}: staging input from {}", spec.id, input);
            race(&deadline, self.store.download_directory(input, &input_dir))
                .await?
                .map_err(|source| ActivityError::Staging {
                    direction: StagingDirection::Input,
                    location: input.clone(),
                    source,
                })?;
        }

        let command = spec.command_line(&input_dir, &output_dir);
        let mut attempts = 0;
        let (exit_code, capture, failure) = loop {
            attempts += 1;
            debug!("{}: attempt {} running {}", spec.id, attempts, command);
            let (exit_code, capture, failure) =
                match race(&deadline, self.executor.execute(&command, &dir)).await? {
                    Ok(output) if output.success() => (output.exit_code, output.capture, None),
                    Ok(output) => {
                        let reason = format!("exit status {}", output.exit_code);
                        (output.exit_code, output.capture, Some((Some(output.exit_code), reason)))
                    }
                    Err(e) => (-1, String::new(), Some((None, e.to_string()))),
                };
            if failure.is_none() || attempts > spec.max_retries {
                break (exit_code, capture, failure);
            }
            warn!(
                "{}: attempt {} failed, retrying ({} of {} retries left)",
                spec.id,
                attempts,
                spec.max_retries + 1 - attempts,
                spec.max_retries
            );
        };

        let local_capture = output_dir.join(&self.capture_file);
        tokio::fs::write(&local_capture, &capture)
            .await
            .map_err(|e| ActivityError::Staging {
                direction: StagingDirection::Output,
                location: local_capture.display().to_string(),
                source: e.into(),
            })?;

        if let Some((exit_code, reason)) = failure {
            return Err(ActivityError::CommandExecution {
                exit_code,
                reason,
                attempts,
            });
        }

        let mut remote = None;
        if let (true, Some(output)) = (spec.stage, &spec.output) {
            info!("{}: staging output to {}", spec.id, output);
            race(&deadline, self.store.upload_directory(&output_dir, output))
                .await?
                .map_err(|source| ActivityError::Staging {
                    direction: StagingDirection::Output,
                    location: output.clone(),
                    source,
                })?;
            remote = Some(format!("{}/{}", output, self.capture_file));
        }

        Ok(ActivityResult {
            exit_code,
            capture: CaptureRef {
                local: local_capture,
                remote,
            },
            attempts,
        })
    }
}

/// Await `work` unless the deadline fires first; dropping `work` cancels it
async fn race<F: Future>(
    deadline: &CancellationToken,
    work: F,
) -> Result<F::Output, ActivityError> {
    tokio::select! {
        biased;
        _ = deadline.cancelled() => Err(ActivityError::Cancelled),
        output = work => Ok(output),
    }
}
