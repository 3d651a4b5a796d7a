//! Collaborators the engine drives: object store, compute, command execution and time

pub mod clock;
pub mod local_compute;
pub mod local_store;
pub mod shell;

use crate::core::config::EngineConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use clock::{ManualClock, SystemClock};
pub use local_compute::LocalComputeProvider;
pub use local_store::LocalObjectStore;
pub use shell::ShellExecutor;

/// Error types for collaborator operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A provisioned compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub instance_type: String,
    /// Working directory on the instance
    pub work_dir: PathBuf,
}

/// Exit status and captured output of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Standard output followed by standard error
    pub capture: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Remote object storage addressed by `s3://bucket/prefix` locations
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy a local directory tree under a remote prefix
    async fn upload_directory(&self, local: &Path, remote: &str) -> Result<(), BackendError>;

    /// Copy everything under a remote prefix into a local directory
    async fn download_directory(&self, remote: &str, local: &Path) -> Result<(), BackendError>;
}

/// Provisions and terminates compute instances
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn provision(&self, instance_type: &str) -> Result<InstanceHandle, BackendError>;

    async fn terminate(&self, instance: &InstanceHandle) -> Result<(), BackendError>;
}

/// Runs a command line on an instance
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, BackendError>;
}

/// The set of collaborators one engine drives
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ObjectStore>,
    pub compute: Arc<dyn ComputeProvider>,
    pub executor: Arc<dyn CommandExecutor>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Filesystem store, directory instances, a local shell and the system clock
    pub fn local(config: &EngineConfig) -> Self {
        Self {
            store: Arc::new(LocalObjectStore::new(&config.store_root)),
            compute: Arc::new(LocalComputeProvider::new(&config.work_root)),
            executor: Arc::new(ShellExecutor::new(config.shell.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Source of the current instant
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wait until `instant` has been reached
    async fn sleep_until(&self, instant: DateTime<Utc>) {
        if let Ok(wait) = (instant - self.now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}
