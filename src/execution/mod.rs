//! Pipeline execution engine

pub mod activity;
pub mod cascade;
pub mod coordinator;
pub mod lifecycle;
pub mod scheduler;

pub use activity::{ActivityError, ActivityResult, ActivityRunner, ActivitySpec};
pub use cascade::{cascade_failure, rerun_set};
pub use coordinator::{EventHandler, RerunError, RunCoordinator, RunEvent};
pub use lifecycle::{ResourceError, ResourceHandle, ResourceManager, ResourceSpec};
pub use scheduler::{run_all, PipelineScheduler, SchedulerReport};
