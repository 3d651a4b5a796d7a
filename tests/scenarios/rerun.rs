//! Manual reruns of a finished run

use crate::helpers::*;
use pipelayer::core::{ObjectStatus, RunInstance, RunOutcome};
use pipelayer::execution::RerunError;
use std::sync::Arc;

#[tokio::test]
async fn test_rerun_recovers_a_failed_activity() {
    let harness = Harness::new(
        Harness::default_input(),
        vec![Step::fail(1, "transient"), Step::writes("count.txt", "3\n")],
    );
    let pipeline = reference_pipeline(&[]);

    let mut run = harness.coordinator.execute(Arc::clone(&pipeline), instant(1, 0)).await;
    assert!(!run.outcome.unwrap().is_success());

    let mut reset = harness
        .coordinator
        .rerun(Arc::clone(&pipeline), &mut run, "ShellCommandActivityObj")
        .await
        .unwrap();
    reset.sort();

    assert_eq!(
        reset,
        vec![
            "Ec2Instance",
            "S3InputLocation",
            "S3OutputLocation",
            "ShellCommandActivityObj"
        ]
    );
    assert_eq!(run.outcome, Some(RunOutcome::Succeeded));
    assert_status(&run, "ShellCommandActivityObj", ObjectStatus::Succeeded);
    assert!(run.error("ShellCommandActivityObj").is_none());
    assert_eq!(harness.compute.provisioned.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(harness.compute.terminations().len(), 2);
    assert!(harness
        .store
        .files_at("s3://example-bucket/output/2024-01-01_000000")
        .is_some());
}

#[tokio::test]
async fn test_rerun_rejects_unknown_object() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);
    let pipeline = reference_pipeline(&[]);
    let mut run = harness.coordinator.execute(Arc::clone(&pipeline), instant(1, 0)).await;

    let err = harness
        .coordinator
        .rerun(pipeline, &mut run, "NoSuchObject")
        .await
        .unwrap_err();
    assert!(matches!(err, RerunError::UnknownObject(id) if id == "NoSuchObject"));
}

#[tokio::test]
async fn test_rerun_requires_a_finished_run() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);
    let pipeline = reference_pipeline(&[]);
    let mut run = RunInstance::new(&pipeline, instant(1, 0), instant(1, 0));

    let err = harness
        .coordinator
        .rerun(pipeline, &mut run, "ShellCommandActivityObj")
        .await
        .unwrap_err();
    assert!(matches!(err, RerunError::InProgress(_)));
}
