//! Mock collaborators and assertions shared by the scenario tests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pipelayer::backend::{
    BackendError, Backends, Clock, CommandExecutor, CommandOutput, ComputeProvider, InstanceHandle,
    ManualClock, ObjectStore,
};
use pipelayer::core::template::{PipelineDefinition, PipelineValues};
use pipelayer::core::{EngineConfig, ObjectStatus, Pipeline, RunInstance};
use pipelayer::execution::{RunCoordinator, RunEvent};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEMPLATE: &str = include_str!("../fixtures/pipeline.json");
pub const VALUES: &str = include_str!("../fixtures/values.json");

pub fn instant(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

/// The line-count pipeline with optional parameter overrides
pub fn reference_pipeline(overrides: &[(&str, &str)]) -> Arc<Pipeline> {
    let mut values = PipelineValues::from_json(VALUES).unwrap();
    for (id, value) in overrides {
        values.set(*id, *value);
    }
    Arc::new(Pipeline::load(PipelineDefinition::from_json(TEMPLATE).unwrap(), values).unwrap())
}

/// The reference values under a different template
pub fn pipeline_with_template(template: &str) -> Arc<Pipeline> {
    let values = PipelineValues::from_json(VALUES).unwrap();
    Arc::new(Pipeline::load(PipelineDefinition::from_json(template).unwrap(), values).unwrap())
}

/// Compute provider that counts provisions and terminations
#[derive(Default)]
pub struct CountingCompute {
    root: PathBuf,
    pub provisioned: AtomicUsize,
    pub terminated: Mutex<Vec<String>>,
    pub fail_provision: bool,
}

impl CountingCompute {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn failing(root: &Path) -> Self {
        Self {
            fail_provision: true,
            ..Self::new(root)
        }
    }

    pub fn terminations(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeProvider for CountingCompute {
    async fn provision(&self, instance_type: &str) -> Result<InstanceHandle, BackendError> {
        if self.fail_provision {
            return Err(BackendError::Remote("InsufficientInstanceCapacity".into()));
        }
        let n = self.provisioned.fetch_add(1, Ordering::SeqCst) + 1;
        let instance_id = format!("i-{:017}", n);
        Ok(InstanceHandle {
            work_dir: self.root.join(&instance_id),
            instance_id,
            instance_type: instance_type.to_string(),
        })
    }

    async fn terminate(&self, instance: &InstanceHandle) -> Result<(), BackendError> {
        self.terminated.lock().unwrap().push(instance.instance_id.clone());
        Ok(())
    }
}

/// Object store holding file contents in memory, keyed by location
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn with_input(location: &str, files: &[(&str, &str)]) -> Self {
        let store = Self::default();
        store.objects.lock().unwrap().insert(
            location.to_string(),
            files
                .iter()
                .map(|(name, content)| (name.to_string(), content.to_string()))
                .collect(),
        );
        store
    }

    pub fn files_at(&self, location: &str) -> Option<BTreeMap<String, String>> {
        self.objects.lock().unwrap().get(location).cloned()
    }

    pub fn locations(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload_directory(&self, local: &Path, remote: &str) -> Result<(), BackendError> {
        let mut files = BTreeMap::new();
        for entry in std::fs::read_dir(local)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                files.insert(name, std::fs::read_to_string(entry.path())?);
            }
        }
        self.objects.lock().unwrap().insert(remote.to_string(), files);
        Ok(())
    }

    async fn download_directory(&self, remote: &str, local: &Path) -> Result<(), BackendError> {
        let files = self
            .files_at(remote)
            .ok_or_else(|| BackendError::Remote(format!("no objects under {}", remote)))?;
        for (name, content) in files {
            std::fs::write(local.join(name), content)?;
        }
        Ok(())
    }
}

/// What a scripted command does
#[derive(Debug, Clone)]
pub enum Step {
    /// Exit with a code, writing `file` into the output staging directory
    Exit { code: i32, capture: String, file: Option<(String, String)> },
    /// Never return
    Hang,
}

impl Step {
    pub fn ok(capture: &str) -> Self {
        Step::Exit {
            code: 0,
            capture: capture.to_string(),
            file: None,
        }
    }

    pub fn fail(code: i32, capture: &str) -> Self {
        Step::Exit {
            code,
            capture: capture.to_string(),
            file: None,
        }
    }

    pub fn writes(name: &str, content: &str) -> Self {
        Step::Exit {
            code: 0,
            capture: String::new(),
            file: Some((name.to_string(), content.to_string())),
        }
    }
}

/// Executor replaying scripted steps; the last step repeats
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    pub commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
    ) -> Result<CommandOutput, BackendError> {
        self.commands.lock().unwrap().push(command.to_string());
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        };
        match step {
            None | Some(Step::Hang) => std::future::pending().await,
            Some(Step::Exit { code, capture, file }) => {
                if let Some((name, content)) = file {
                    std::fs::write(working_dir.join("output").join(name), content)?;
                }
                Ok(CommandOutput {
                    exit_code: code,
                    capture,
                })
            }
        }
    }
}

/// A coordinator over mock collaborators, keeping handles to inspect them
pub struct Harness {
    pub coordinator: Arc<RunCoordinator>,
    pub compute: Arc<CountingCompute>,
    pub store: Arc<MemoryStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<Mutex<Vec<RunEvent>>>,
    _work: tempfile::TempDir,
}

impl Harness {
    pub fn new(store: MemoryStore, steps: Vec<Step>) -> Self {
        let work = tempfile::tempdir().unwrap();
        let compute = CountingCompute::new(work.path());
        Self::with_compute(work, compute, store, steps)
    }

    pub fn with_compute(
        work: tempfile::TempDir,
        compute: CountingCompute,
        store: MemoryStore,
        steps: Vec<Step>,
    ) -> Self {
        let compute = Arc::new(compute);
        let store = Arc::new(store);
        let executor = Arc::new(ScriptedExecutor::new(steps));
        let clock = Arc::new(ManualClock::new(instant(1, 0)));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let backends = Backends {
            store: store.clone(),
            compute: compute.clone(),
            executor: executor.clone(),
            clock: clock_dyn,
        };
        let config = EngineConfig {
            teardown_grace_secs: 5,
            ..EngineConfig::default()
        };
        let coordinator = Arc::new(RunCoordinator::new(backends, &config));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        coordinator.add_event_handler(move |event| sink.lock().unwrap().push(event));

        Self {
            coordinator,
            compute,
            store,
            executor,
            clock,
            events,
            _work: work,
        }
    }

    pub fn default_input() -> MemoryStore {
        MemoryStore::with_input(
            "s3://example-bucket/input",
            &[("a.txt", "one\n"), ("b.txt", "two\n"), ("c.txt", "three\n")],
        )
    }

    /// Status changes emitted for one object, in order
    pub fn transitions(&self, object: &str) -> Vec<ObjectStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RunEvent::ObjectStatusChanged {
                    object: o, status, ..
                } if o == object => Some(*status),
                _ => None,
            })
            .collect()
    }
}

pub fn assert_status(run: &RunInstance, object: &str, expected: ObjectStatus) {
    assert_eq!(
        run.status(object),
        Some(expected),
        "status of {} (error: {:?})",
        object,
        run.error(object)
    );
}
