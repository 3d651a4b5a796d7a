//! Error taxonomy for template loading, evaluation and scheduling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or evaluating `#{...}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("malformed expression at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("unresolved parameter '{0}'")]
    UnresolvedParameter(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("cyclic expression through '{parameter}' (gave up after {passes} substitution passes)")]
    Cyclic { parameter: String, passes: usize },

    #[error("invalid argument to {function}: {reason}")]
    InvalidArgument { function: String, reason: String },
}

impl ExpressionError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        ExpressionError::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_argument(function: &str, reason: impl Into<String>) -> Self {
        ExpressionError::InvalidArgument {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the schedule resolver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("'{0}' cannot be parsed as a period")]
    InvalidPeriod(String),

    #[error("'{0}' cannot be parsed as a date-time (expected YYYY-MM-ddTHH:mm:ss)")]
    InvalidDateTime(String),

    #[error("schedule field '{field}': {error}")]
    Expression {
        field: String,
        error: ExpressionError,
    },
}

/// Errors raised while building the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("reference cycle: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    #[error("object '{object}' field '{field}' references non-existent object '{target}'")]
    DanglingReference {
        object: String,
        field: String,
        target: String,
    },

    #[error("duplicate object id '{0}'")]
    DuplicateObject(String),
}

/// Errors raised while loading a template and its parameter values
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("object '{object}' has unsupported type '{object_type}'")]
    UnsupportedType { object: String, object_type: String },

    #[error("object '{object}' is missing required field '{field}'")]
    MissingField { object: String, field: String },

    #[error("object '{object}' field '{field}' must reference a {expected}")]
    WrongReference {
        object: String,
        field: String,
        expected: String,
    },

    #[error("object '{object}' field '{field}': {reason}")]
    InvalidField {
        object: String,
        field: String,
        reason: String,
    },

    #[error("parameter '{id}' has unknown type '{parameter_type}'")]
    UnknownParameterType { id: String, parameter_type: String },

    #[error("value supplied for undeclared parameter '{0}'")]
    UndeclaredParameter(String),

    #[error("invalid value for parameter '{id}': {reason}")]
    InvalidParameterValue { id: String, reason: String },

    #[error("pipeline '{0}' is already part of the set")]
    DuplicatePipeline(String),

    #[error("template defines no schedule")]
    MissingSchedule,

    #[error("template defines {0} schedules and Default names none of them")]
    AmbiguousSchedule(usize),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Failure categories recorded against pipeline objects in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    MalformedExpression,
    UnresolvedParameter,
    UnknownFunction,
    CyclicExpression,
    InvalidArgument,
    InvalidSchedule,
    ResourceTimeout,
    Provisioning,
    Teardown,
    Staging,
    CommandExecution,
}

/// A failure attached to the object that raised it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: FailureKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&ExpressionError> for RunError {
    fn from(err: &ExpressionError) -> Self {
        let kind = match err {
            ExpressionError::Malformed { .. } => FailureKind::MalformedExpression,
            ExpressionError::UnresolvedParameter(_) => FailureKind::UnresolvedParameter,
            ExpressionError::UnknownFunction(_) => FailureKind::UnknownFunction,
            ExpressionError::Cyclic { .. } => FailureKind::CyclicExpression,
            ExpressionError::InvalidArgument { .. } => FailureKind::InvalidArgument,
        };
        RunError::new(kind, err.to_string())
    }
}

impl From<&ScheduleError> for RunError {
    fn from(err: &ScheduleError) -> Self {
        match err {
            ScheduleError::Expression { error, .. } => {
                RunError::new(RunError::from(error).kind, err.to_string())
            }
            _ => RunError::new(FailureKind::InvalidSchedule, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::CyclicReference {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "reference cycle: a -> b -> a");
    }

    #[test]
    fn test_expression_error_maps_to_kind() {
        let err = ExpressionError::UnresolvedParameter("myS3InputDir".into());
        let run_error = RunError::from(&err);
        assert_eq!(run_error.kind, FailureKind::UnresolvedParameter);
        assert!(run_error.message.contains("myS3InputDir"));
    }
}
