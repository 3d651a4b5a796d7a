//! Resource lifecycle - provisioning, the terminateAfter deadline and teardown

use crate::backend::{BackendError, ComputeProvider, InstanceHandle};
use crate::core::error::{FailureKind, RunError};
use crate::core::object::PipelineObject;
use crate::core::period::Period;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Instance type used when a resource names none
pub const DEFAULT_INSTANCE_TYPE: &str = "m1.small";

/// Error types for resource operations
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to provision {resource}: {source}")]
    Provisioning {
        resource: String,
        #[source]
        source: BackendError,
    },

    #[error("{resource} exceeded terminateAfter ({after})")]
    Timeout { resource: String, after: Period },

    #[error("failed to tear down {resource}: {reason}")]
    Teardown { resource: String, reason: String },
}

impl From<&ResourceError> for RunError {
    fn from(err: &ResourceError) -> Self {
        let kind = match err {
            ResourceError::Provisioning { .. } => FailureKind::Provisioning,
            ResourceError::Timeout { .. } => FailureKind::ResourceTimeout,
            ResourceError::Teardown { .. } => FailureKind::Teardown,
        };
        RunError::new(kind, err.to_string())
    }
}

/// What to provision, taken from an evaluated `Ec2Resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub object_id: String,
    pub instance_type: String,
    pub terminate_after: Option<Period>,
}

impl ResourceSpec {
    pub fn from_object(object: &PipelineObject) -> Result<Self, RunError> {
        let terminate_after = object
            .text("terminateAfter")
            .map(|text| {
                let period = Period::parse(text).map_err(|e| {
                    RunError::new(FailureKind::InvalidArgument, format!("terminateAfter: {}", e))
                })?;
                if !period.is_positive() {
                    return Err(RunError::new(
                        FailureKind::InvalidArgument,
                        format!("terminateAfter must be positive, got '{}'", period),
                    ));
                }
                Ok(period)
            })
            .transpose()?;

        Ok(Self {
            object_id: object.id.clone(),
            instance_type: object
                .text("instanceType")
                .unwrap_or(DEFAULT_INSTANCE_TYPE)
                .to_string(),
            terminate_after,
        })
    }
}

/// Held while work runs on a resource; teardown after a timeout waits for it
pub struct WorkGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

struct HandleInner {
    run_id: Uuid,
    spec: ResourceSpec,
    instance: InstanceHandle,
    compute: Arc<dyn ComputeProvider>,
    /// Cancelled when terminateAfter elapses
    deadline: CancellationToken,
    /// Cancelled once teardown starts; stops the watchdog
    released: CancellationToken,
    work: Arc<RwLock<()>>,
    timed_out: AtomicBool,
    /// `Some` once the provider has been asked to terminate
    teardown: Mutex<Option<Result<(), String>>>,
}

/// A provisioned resource tied to one run
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("object_id", &self.inner.spec.object_id)
            .field("instance", &self.inner.instance)
            .field("timed_out", &self.timed_out())
            .finish()
    }
}

impl ResourceHandle {
    pub fn instance(&self) -> &InstanceHandle {
        &self.inner.instance
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.inner.spec
    }

    /// Token cancelled when the resource's deadline fires
    pub fn deadline(&self) -> CancellationToken {
        self.inner.deadline.clone()
    }

    pub fn timed_out(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }

    /// The timeout error, if the deadline fired
    pub fn timeout_error(&self) -> Option<ResourceError> {
        self.inner
            .spec
            .terminate_after
            .filter(|_| self.timed_out())
            .map(|after| ResourceError::Timeout {
                resource: self.inner.spec.object_id.clone(),
                after,
            })
    }

    /// Register in-flight work; `None` once the deadline has fired
    pub async fn begin_work(&self) -> Option<WorkGuard> {
        if self.inner.deadline.is_cancelled() {
            return None;
        }
        let guard = Arc::clone(&self.inner.work).read_owned().await;
        if self.inner.deadline.is_cancelled() {
            return None;
        }
        Some(WorkGuard { _guard: guard })
    }

    pub async fn is_torn_down(&self) -> bool {
        self.inner.teardown.lock().await.is_some()
    }

    /// Terminate the instance; later and concurrent calls wait for and
    /// share the first call's result
    pub async fn teardown(&self) -> Result<(), ResourceError> {
        let mut state = self.inner.teardown.lock().await;
        if let Some(result) = state.as_ref() {
            return result.clone().map_err(|reason| ResourceError::Teardown {
                resource: self.inner.spec.object_id.clone(),
                reason,
            });
        }

        self.inner.released.cancel();
        let result = self
            .inner
            .compute
            .terminate(&self.inner.instance)
            .await
            .map_err(|e| e.to_string());
        match &result {
            Ok(()) => info!(
                run_id = %self.inner.run_id,
                "Tore down {} ({})",
                self.inner.spec.object_id,
                self.inner.instance.instance_id
            ),
            Err(reason) => error!(
                run_id = %self.inner.run_id,
                "Teardown of {} failed: {}",
                self.inner.spec.object_id,
                reason
            ),
        }
        *state = Some(result.clone());
        result.map_err(|reason| ResourceError::Teardown {
            resource: self.inner.spec.object_id.clone(),
            reason,
        })
    }
}

/// Provisions resources and enforces their deadlines
pub struct ResourceManager {
    compute: Arc<dyn ComputeProvider>,
    grace: Duration,
}

impl ResourceManager {
    pub fn new(compute: Arc<dyn ComputeProvider>, grace: Duration) -> Self {
        Self { compute, grace }
    }

    /// Provision a resource for a run and arm its deadline
    pub async fn provision(
        &self,
        spec: ResourceSpec,
        run_id: Uuid,
    ) -> Result<ResourceHandle, ResourceError> {
        debug!(run_id = %run_id, "Provisioning {} ({})", spec.object_id, spec.instance_type);
        let instance = self
            .compute
            .provision(&spec.instance_type)
            .await
            .map_err(|source| ResourceError::Provisioning {
                resource: spec.object_id.clone(),
                source,
            })?;

        let handle = ResourceHandle {
            inner: Arc::new(HandleInner {
                run_id,
                spec,
                instance,
                compute: Arc::clone(&self.compute),
                deadline: CancellationToken::new(),
                released: CancellationToken::new(),
                work: Arc::new(RwLock::new(())),
                timed_out: AtomicBool::new(false),
                teardown: Mutex::new(None),
            }),
        };

        if let Some(after) = handle.inner.spec.terminate_after.and_then(Period::to_std) {
            tokio::spawn(Self::watchdog(handle.clone(), after, self.grace));
        }
        Ok(handle)
    }

    /// Tear a resource down (idempotent)
    pub async fn teardown(&self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        handle.teardown().await
    }

    async fn watchdog(handle: ResourceHandle, after: Duration, grace: Duration) {
        tokio::select! {
            _ = handle.inner.released.cancelled() => return,
            _ = tokio::time::sleep(after) => {}
        }

        warn!(
            run_id = %handle.inner.run_id,
            "{} reached terminateAfter, cancelling in-flight work",
            handle.inner.spec.object_id
        );
        handle.inner.timed_out.store(true, Ordering::SeqCst);
        handle.inner.deadline.cancel();

        // In-flight work holds read guards until it observes the cancellation
        if tokio::time::timeout(grace, handle.inner.work.write()).await.is_err() {
            warn!(
                run_id = %handle.inner.run_id,
                "Work on {} did not stop within {:?}",
                handle.inner.spec.object_id,
                grace
            );
        }
        let _ = handle.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::ObjectType;
    use crate::core::period::PeriodUnit;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCompute {
        terminated: AtomicUsize,
        fail_provision: bool,
    }

    #[async_trait]
    impl ComputeProvider for CountingCompute {
        async fn provision(&self, instance_type: &str) -> Result<InstanceHandle, BackendError> {
            if self.fail_provision {
                return Err(BackendError::Remote("capacity".into()));
            }
            Ok(InstanceHandle {
                instance_id: "i-0001".into(),
                instance_type: instance_type.into(),
                work_dir: PathBuf::from("/tmp/i-0001"),
            })
        }

        async fn terminate(&self, _instance: &InstanceHandle) -> Result<(), BackendError> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn spec(terminate_after: Option<Period>) -> ResourceSpec {
        ResourceSpec {
            object_id: "Ec2Instance".into(),
            instance_type: "t1.micro".into(),
            terminate_after,
        }
    }

    #[test]
    fn test_spec_from_object() {
        let object = PipelineObject::new("Ec2Instance", ObjectType::Ec2Resource)
            .with_text("terminateAfter", "50 minutes");
        let spec = ResourceSpec::from_object(&object).unwrap();
        assert_eq!(spec.instance_type, DEFAULT_INSTANCE_TYPE);
        assert_eq!(spec.terminate_after, Some(Period::new(50, PeriodUnit::Minutes)));

        let zero = object.clone().with_text("terminateAfter", "0 minutes");
        assert_eq!(
            ResourceSpec::from_object(&zero).unwrap_err().kind,
            FailureKind::InvalidArgument
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let compute = Arc::new(CountingCompute::default());
        let manager = ResourceManager::new(compute.clone(), Duration::from_secs(1));
        let handle = manager.provision(spec(None), Uuid::new_v4()).await.unwrap();

        let (a, b) = tokio::join!(handle.teardown(), manager.teardown(&handle));
        assert!(a.is_ok() && b.is_ok());
        handle.teardown().await.unwrap();
        assert_eq!(compute.terminated.load(Ordering::SeqCst), 1);
        assert!(handle.is_torn_down().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_work_and_tears_down_once() {
        let compute = Arc::new(CountingCompute::default());
        let manager = ResourceManager::new(compute.clone(), Duration::from_secs(30));
        let handle = manager
            .provision(spec(Some(Period::new(5, PeriodUnit::Minutes))), Uuid::new_v4())
            .await
            .unwrap();

        let guard = handle.begin_work().await.unwrap();
        handle.deadline().cancelled().await;
        assert!(handle.timed_out());
        drop(guard);

        handle.teardown().await.unwrap();
        assert_eq!(compute.terminated.load(Ordering::SeqCst), 1);
        assert!(handle.begin_work().await.is_none());
        assert!(matches!(handle.timeout_error(), Some(ResourceError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_deadline_disarms_watchdog() {
        let compute = Arc::new(CountingCompute::default());
        let manager = ResourceManager::new(compute.clone(), Duration::from_secs(30));
        let handle = manager
            .provision(spec(Some(Period::new(1, PeriodUnit::Minutes))), Uuid::new_v4())
            .await
            .unwrap();

        handle.teardown().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!handle.timed_out());
        assert_eq!(compute.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure() {
        let compute = Arc::new(CountingCompute {
            fail_provision: true,
            ..Default::default()
        });
        let manager = ResourceManager::new(compute, Duration::from_secs(1));
        let err = manager.provision(spec(None), Uuid::new_v4()).await.unwrap_err();
        assert_eq!(RunError::from(&err).kind, FailureKind::Provisioning);
    }
}
