//! Local compute provider - an instance is a fresh working directory

use crate::backend::{BackendError, ComputeProvider, InstanceHandle};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Provisions "instances" as directories under a root
#[derive(Debug)]
pub struct LocalComputeProvider {
    root: PathBuf,
    live: Mutex<HashSet<String>>,
}

impl LocalComputeProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Ids of instances provisioned and not yet terminated
    pub fn live_instances(&self) -> Vec<String> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.iter().cloned().collect()
    }
}

#[async_trait]
impl ComputeProvider for LocalComputeProvider {
    async fn provision(&self, instance_type: &str) -> Result<InstanceHandle, BackendError> {
        let simple = Uuid::new_v4().simple().to_string();
        let instance_id = format!("i-{}", &simple[..17]);
        let work_dir = self.root.join(&instance_id);
        tokio::fs::create_dir_all(&work_dir).await?;

        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance_id.clone());
        info!("Provisioned {} ({}) at {}", instance_id, instance_type, work_dir.display());

        Ok(InstanceHandle {
            instance_id,
            instance_type: instance_type.to_string(),
            work_dir,
        })
    }

    async fn terminate(&self, instance: &InstanceHandle) -> Result<(), BackendError> {
        let known = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&instance.instance_id);
        if !known {
            return Err(BackendError::Remote(format!(
                "unknown instance {}",
                instance.instance_id
            )));
        }

        if tokio::fs::try_exists(&instance.work_dir).await? {
            tokio::fs::remove_dir_all(&instance.work_dir).await?;
        }
        debug!("Terminated {}", instance.instance_id);
        Ok(())
    }
}
