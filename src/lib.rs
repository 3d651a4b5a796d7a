//! pipelayer - runs pipeline templates on a schedule
//!
//! A template's objects are evaluated against parameter values for each
//! scheduled instant, their compute resource is provisioned with a deadline,
//! the activity stages data through an object store and runs its command,
//! and failures cascade through the object graph.

pub mod backend;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use backend::{Backends, Clock, CommandExecutor, ComputeProvider, ObjectStore};
pub use core::{EngineConfig, ObjectStatus, Pipeline, RunInstance, RunOutcome, RunPhase};
pub use execution::{PipelineScheduler, RunCoordinator, RunEvent};
