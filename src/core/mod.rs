//! Core domain models for pipelayer
//!
//! Templates, parameters, the expression language, schedules, the object
//! dependency graph and the per-run state built on top of them.

pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod graph;
pub mod object;
pub mod parameter;
pub mod period;
pub mod pipeline;
pub mod pipeline_set;
pub mod run;
pub mod schedule;
pub mod state;
pub mod template;
pub mod timefmt;

pub use config::EngineConfig;
pub use context::EvaluationContext;
pub use error::{
    ExpressionError, FailureKind, GraphError, RunError, ScheduleError, TemplateError,
};
pub use evaluator::{Evaluator, Value};
pub use graph::{DependencyGraph, ObjectId};
pub use object::{FieldValue, ObjectType, PipelineObject};
pub use parameter::{Parameter, ParameterSet, ParameterType, ParameterValue};
pub use period::{Period, PeriodUnit};
pub use pipeline::{Pipeline, Validation};
pub use pipeline_set::{PipelineEntry, PipelineSet};
pub use run::{ObjectRecord, RunInstance};
pub use schedule::Schedule;
pub use state::{ObjectStatus, RerunPolicy, RunOutcome, RunPhase};
pub use template::{PipelineDefinition, PipelineValues};
