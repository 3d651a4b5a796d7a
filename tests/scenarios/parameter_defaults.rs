//! Parameter defaults, overrides and evaluation failures in a run

use crate::helpers::*;
use pipelayer::core::template::{PipelineDefinition, PipelineValues};
use pipelayer::core::{FailureKind, ObjectStatus, Pipeline, RunOutcome, RunPhase};
use std::sync::Arc;

fn evaluated_field(
    run: &pipelayer::core::RunInstance,
    object: &str,
    field: &str,
) -> Option<String> {
    run.records()
        .iter()
        .find(|r| r.id == object)
        .and_then(|r| r.evaluated.as_ref())
        .and_then(|o| o.text(field).map(str::to_string))
}

#[tokio::test]
async fn test_default_follows_overridden_period() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[("mySchedulePeriod", "2 hours")]), instant(1, 0))
        .await;

    assert_eq!(run.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(
        evaluated_field(&run, "Ec2Instance", "terminateAfter").as_deref(),
        Some("110 minutes")
    );
}

#[tokio::test]
async fn test_supplied_value_beats_default() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[("myTerminateAfter", "20 minutes")]), instant(1, 0))
        .await;

    assert_eq!(
        evaluated_field(&run, "Ec2Instance", "terminateAfter").as_deref(),
        Some("20 minutes")
    );
}

#[tokio::test]
async fn test_unresolved_parameter_aborts_before_provisioning() {
    let mut values = PipelineValues::from_json(VALUES).unwrap();
    values.values.remove("myS3InputDir");
    let definition = PipelineDefinition::from_json(TEMPLATE).unwrap();
    let pipeline = Arc::new(Pipeline::load(definition, values).unwrap());
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);

    let run = harness.coordinator.execute(pipeline, instant(1, 0)).await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::UnresolvedParameter
        })
    );
    assert_status(&run, "S3InputLocation", ObjectStatus::Failed);
    assert!(run
        .error("S3InputLocation")
        .unwrap()
        .message
        .contains("myS3InputDir"));
    for object in ["ShellCommandActivityObj", "Ec2Instance", "S3OutputLocation"] {
        assert_status(&run, object, ObjectStatus::CascadeCancelled);
    }
    assert_eq!(harness.compute.provisioned.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(!run.phases().contains(&RunPhase::Provisioning));
    assert_eq!(run.phases().last(), Some(&RunPhase::TornDown));
}

#[tokio::test]
async fn test_invalid_period_fails_the_schedule() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[("mySchedulePeriod", "0 hours")]), instant(1, 0))
        .await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::InvalidSchedule
        })
    );
    assert_status(&run, "DefaultSchedule", ObjectStatus::Failed);
    assert_status(&run, "ShellCommandActivityObj", ObjectStatus::CascadeCancelled);
    assert!(harness.executor.commands().is_empty());
}
