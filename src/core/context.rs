//! Evaluation context - parameters plus runtime variables for one evaluation

use crate::core::evaluator::Value;
use crate::core::parameter::ParameterSet;
use crate::core::period::Period;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Default bound on nested parameter substitutions
pub const DEFAULT_MAX_SUBSTITUTION_PASSES: usize = 16;

/// Everything an expression may read
///
/// Passed explicitly to the evaluator; the parameter set is shared read-only
/// between runs while runtime variables belong to a single evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    parameters: Arc<ParameterSet>,
    runtime: HashMap<String, Value>,
    max_passes: usize,
}

impl EvaluationContext {
    /// Context with parameters only (no runtime variables)
    pub fn new(parameters: Arc<ParameterSet>) -> Self {
        Self {
            parameters,
            runtime: HashMap::new(),
            max_passes: DEFAULT_MAX_SUBSTITUTION_PASSES,
        }
    }

    /// Context for a scheduled firing
    pub fn for_instant(
        parameters: Arc<ParameterSet>,
        scheduled_start: DateTime<Utc>,
        period: Period,
    ) -> Self {
        let context = Self::new(parameters)
            .with_runtime("scheduledStartTime", Value::Instant(scheduled_start));
        // Left unset when the end falls outside the calendar
        match scheduled_start.checked_add_signed(period.to_duration()) {
            Some(end) => context.with_runtime("scheduledEndTime", Value::Instant(end)),
            None => context,
        }
    }

    pub fn with_runtime(mut self, name: impl Into<String>, value: Value) -> Self {
        self.runtime.insert(name.into(), value);
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Set a runtime variable
    pub fn set_runtime(&mut self, name: impl Into<String>, value: Value) {
        self.runtime.insert(name.into(), value);
    }

    /// Get a runtime variable (without the leading `@`)
    pub fn runtime(&self, name: &str) -> Option<&Value> {
        self.runtime.get(name)
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }
}
