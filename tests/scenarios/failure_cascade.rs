//! Failures cascade through the object graph and never leak a resource

use crate::helpers::*;
use pipelayer::core::{FailureKind, ObjectStatus, RunOutcome, RunPhase};

#[tokio::test]
async fn test_command_failure_cancels_the_rest() {
    let harness = Harness::new(Harness::default_input(), vec![Step::fail(1, "wc: no such file")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[]), instant(1, 0))
        .await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::CommandExecution
        })
    );
    assert_status(&run, "ShellCommandActivityObj", ObjectStatus::Failed);
    assert_eq!(
        run.error("ShellCommandActivityObj").map(|e| e.kind),
        Some(FailureKind::CommandExecution)
    );
    for object in ["Ec2Instance", "S3InputLocation", "S3OutputLocation"] {
        assert_status(&run, object, ObjectStatus::CascadeCancelled);
    }
    assert_status(&run, "DefaultSchedule", ObjectStatus::Succeeded);

    // Exactly one teardown, and nothing staged out
    assert_eq!(harness.compute.terminations().len(), 1);
    assert_eq!(harness.store.locations(), vec!["s3://example-bucket/input"]);
    assert_eq!(run.phases().last(), Some(&RunPhase::TornDown));
    assert!(run.phases().contains(&RunPhase::Failed));
}

#[tokio::test]
async fn test_retries_before_failing() {
    let template = TEMPLATE.replace(
        r#""stage": "true","#,
        r#""stage": "true", "maximumRetries": "2","#,
    );
    let harness = Harness::new(
        Harness::default_input(),
        vec![
            Step::fail(1, "flaky"),
            Step::fail(1, "flaky"),
            Step::writes("count.txt", "3\n"),
        ],
    );

    let run = harness
        .coordinator
        .execute(pipeline_with_template(&template), instant(1, 0))
        .await;

    assert_eq!(run.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(harness.executor.commands().len(), 3);
    let activity = run
        .records()
        .iter()
        .find(|r| r.id == "ShellCommandActivityObj")
        .unwrap();
    assert_eq!(activity.attempts, 3);
}

#[tokio::test]
async fn test_provisioning_failure_skips_the_activity() {
    let work = tempfile::tempdir().unwrap();
    let compute = CountingCompute::failing(work.path());
    let harness =
        Harness::with_compute(work, compute, Harness::default_input(), vec![Step::ok("")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[]), instant(1, 0))
        .await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::Provisioning
        })
    );
    assert_status(&run, "Ec2Instance", ObjectStatus::Failed);
    for object in ["ShellCommandActivityObj", "S3InputLocation", "S3OutputLocation"] {
        assert_status(&run, object, ObjectStatus::CascadeCancelled);
    }
    assert!(harness.executor.commands().is_empty());
    assert!(harness.compute.terminations().is_empty());
}

#[tokio::test]
async fn test_missing_input_is_a_staging_failure() {
    let harness = Harness::new(MemoryStore::default(), vec![Step::ok("")]);

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[]), instant(1, 0))
        .await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::Staging
        })
    );
    assert_status(&run, "ShellCommandActivityObj", ObjectStatus::Failed);
    let message = &run.error("ShellCommandActivityObj").unwrap().message;
    assert!(message.contains("s3://example-bucket/input"), "{}", message);
    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.compute.terminations().len(), 1);
}
