//! Scenario tests: whole runs of the line-count pipeline over mock collaborators

mod helpers;

mod failure_cascade;
mod parameter_defaults;
mod pipeline_set;
mod rerun;
mod resource_timeout;
mod success_run;
