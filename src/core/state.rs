//! Execution state models

use crate::core::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single object within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    /// Waiting for its turn
    Pending,
    /// Being provisioned, staged or executed
    Running,
    /// Finished successfully
    Succeeded,
    /// Raised an error (attached to the object)
    Failed,
    /// Cancelled because an object it depends on, or serves, failed
    CascadeCancelled,
}

impl ObjectStatus {
    /// Check if the object is in a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ObjectStatus::Succeeded | ObjectStatus::Failed | ObjectStatus::CascadeCancelled
        )
    }

    /// Failed or cancelled
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, ObjectStatus::Failed | ObjectStatus::CascadeCancelled)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ObjectStatus::Pending => "PENDING",
            ObjectStatus::Running => "RUNNING",
            ObjectStatus::Succeeded => "SUCCEEDED",
            ObjectStatus::Failed => "FAILED",
            ObjectStatus::CascadeCancelled => "CASCADE_CANCELLED",
        };
        f.write_str(label)
    }
}

/// Phase of a run instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Scheduled,
    Evaluating,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    TornDown,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Scheduled => "SCHEDULED",
            RunPhase::Evaluating => "EVALUATING",
            RunPhase::Provisioning => "PROVISIONING",
            RunPhase::Running => "RUNNING",
            RunPhase::Succeeded => "SUCCEEDED",
            RunPhase::Failed => "FAILED",
            RunPhase::TornDown => "TORN_DOWN",
        };
        f.write_str(label)
    }
}

/// Final result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Succeeded,
    Failed { reason: FailureKind },
}

impl RunOutcome {
    pub fn is_success(self) -> bool {
        self == RunOutcome::Succeeded
    }
}

/// Failure/rerun mode declared by `failureAndRerunMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RerunPolicy {
    /// Rerunning an object also resets its cancelled dependents
    Cascade,
    /// Rerunning an object resets only that object (and what it needs to run)
    #[default]
    None,
}

impl RerunPolicy {
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode.to_ascii_uppercase().as_str() {
            "CASCADE" => Some(RerunPolicy::Cascade),
            "NONE" => Some(RerunPolicy::None),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_status_is_terminal() {
        assert!(!ObjectStatus::Pending.is_terminal());
        assert!(!ObjectStatus::Running.is_terminal());
        assert!(ObjectStatus::Succeeded.is_terminal());
        assert!(ObjectStatus::Failed.is_terminal());
        assert!(ObjectStatus::CascadeCancelled.is_terminal());
        assert!(!ObjectStatus::Succeeded.is_unsuccessful());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ObjectStatus::CascadeCancelled.to_string(), "CASCADE_CANCELLED");
        assert_eq!(RunPhase::TornDown.to_string(), "TORN_DOWN");
        assert_eq!(
            serde_json::to_string(&ObjectStatus::CascadeCancelled).unwrap(),
            "\"CASCADE_CANCELLED\""
        );
    }

    #[test]
    fn test_rerun_policy_from_mode() {
        assert_eq!(RerunPolicy::from_mode("CASCADE"), Some(RerunPolicy::Cascade));
        assert_eq!(RerunPolicy::from_mode("none"), Some(RerunPolicy::None));
        assert_eq!(RerunPolicy::from_mode("retry"), None);
    }
}
