//! A run that stages input, counts lines and stages output

use crate::helpers::*;
use pipelayer::core::{ObjectStatus, RunOutcome, RunPhase};
use pipelayer::execution::RunEvent;
use std::sync::Arc;

#[tokio::test]
async fn test_successful_run_stages_and_tears_down() {
    let harness = Harness::new(Harness::default_input(), vec![Step::writes("count.txt", "3\n")]);
    let pipeline = reference_pipeline(&[]);

    let run = harness.coordinator.execute(Arc::clone(&pipeline), instant(1, 0)).await;

    assert_eq!(run.outcome, Some(RunOutcome::Succeeded));
    for object in [
        "Default",
        "DefaultSchedule",
        "Ec2Instance",
        "S3InputLocation",
        "S3OutputLocation",
        "ShellCommandActivityObj",
    ] {
        assert_status(&run, object, ObjectStatus::Succeeded);
    }
    assert_eq!(
        run.phases(),
        vec![
            RunPhase::Scheduled,
            RunPhase::Evaluating,
            RunPhase::Provisioning,
            RunPhase::Running,
            RunPhase::Succeeded,
            RunPhase::TornDown,
        ]
    );

    // Output lands under the formatted scheduled instant, with the capture file
    let output = "s3://example-bucket/output/2024-01-01_000000";
    assert_eq!(run.output_location.as_deref(), Some(output));
    let files = harness.store.files_at(output).expect("output staged");
    assert_eq!(files.get("count.txt").map(String::as_str), Some("3\n"));
    assert!(files.contains_key("stdout.log"));

    // Placeholders were replaced with the activity's staging directories
    let commands = harness.executor.commands();
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].contains("${INPUT1_STAGING_DIR}"));
    assert!(commands[0].contains("ShellCommandActivityObj/input/*.txt"));
    assert!(commands[0].contains("ShellCommandActivityObj/output/count.txt"));

    assert_eq!(harness.compute.terminations().len(), 1);
}

#[tokio::test]
async fn test_resource_gets_terminate_after_from_default() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);
    let pipeline = reference_pipeline(&[]);

    let run = harness.coordinator.execute(pipeline, instant(1, 0)).await;

    let ec2 = run
        .records()
        .iter()
        .find(|r| r.id == "Ec2Instance")
        .and_then(|r| r.evaluated.clone())
        .unwrap();
    assert_eq!(ec2.text("terminateAfter"), Some("50 minutes"));
    assert_eq!(ec2.text("instanceType"), Some("t1.micro"));
}

#[tokio::test]
async fn test_distinct_instants_write_distinct_outputs() {
    let harness = Harness::new(Harness::default_input(), vec![Step::writes("count.txt", "3\n")]);
    let pipeline = reference_pipeline(&[]);

    let first = harness.coordinator.execute(Arc::clone(&pipeline), instant(1, 0)).await;
    let second = harness.coordinator.execute(Arc::clone(&pipeline), instant(1, 1)).await;

    assert_ne!(first.output_location, second.output_location);
    assert_ne!(first.run_id, second.run_id);
    let outputs: Vec<String> = harness
        .store
        .locations()
        .into_iter()
        .filter(|l| l.starts_with("s3://example-bucket/output/"))
        .collect();
    assert_eq!(
        outputs,
        vec![
            "s3://example-bucket/output/2024-01-01_000000",
            "s3://example-bucket/output/2024-01-01_010000",
        ]
    );
}

#[tokio::test]
async fn test_concurrent_runs_share_the_pipeline() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);
    let pipeline = reference_pipeline(&[]);

    let (a, b) = tokio::join!(
        harness.coordinator.execute(Arc::clone(&pipeline), instant(2, 0)),
        harness.coordinator.execute(Arc::clone(&pipeline), instant(2, 1)),
    );

    assert!(a.outcome.unwrap().is_success());
    assert!(b.outcome.unwrap().is_success());
    assert_eq!(harness.compute.terminations().len(), 2);
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let harness = Harness::new(Harness::default_input(), vec![Step::ok("")]);
    let run = harness
        .coordinator
        .execute(reference_pipeline(&[]), instant(1, 0))
        .await;

    let events = harness.events.lock().unwrap().clone();
    assert!(matches!(
        events.first(),
        Some(RunEvent::RunStarted { run_id, .. }) if *run_id == run.run_id
    ));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished { outcome: RunOutcome::Succeeded, .. })
    ));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RunEvent::ResourceTornDown { .. }))
            .count(),
        1
    );
    assert_eq!(
        harness.transitions("ShellCommandActivityObj"),
        vec![ObjectStatus::Running, ObjectStatus::Succeeded]
    );
}
