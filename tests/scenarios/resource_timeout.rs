//! A command that never returns is stopped by the resource's terminateAfter

use crate::helpers::*;
use pipelayer::core::{FailureKind, ObjectStatus, RunOutcome, RunPhase};
use pipelayer::execution::RunEvent;

#[tokio::test(start_paused = true)]
async fn test_hanging_command_times_out() {
    let harness = Harness::new(Harness::default_input(), vec![Step::Hang]);
    let started = tokio::time::Instant::now();

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[]), instant(1, 0))
        .await;

    assert_eq!(
        run.outcome,
        Some(RunOutcome::Failed {
            reason: FailureKind::ResourceTimeout
        })
    );
    assert_status(&run, "Ec2Instance", ObjectStatus::Failed);
    assert_eq!(
        run.error("Ec2Instance").map(|e| e.kind),
        Some(FailureKind::ResourceTimeout)
    );
    for object in ["ShellCommandActivityObj", "S3InputLocation", "S3OutputLocation"] {
        assert_status(&run, object, ObjectStatus::CascadeCancelled);
    }

    // The deadline is terminateAfter (50 minutes), not a moment sooner
    assert!(started.elapsed() >= std::time::Duration::from_secs(50 * 60));
    assert_eq!(harness.compute.terminations().len(), 1);
    assert_eq!(harness.store.locations(), vec!["s3://example-bucket/input"]);
    assert_eq!(run.phases().last(), Some(&RunPhase::TornDown));
}

#[tokio::test(start_paused = true)]
async fn test_shorter_period_shortens_the_deadline() {
    let harness = Harness::new(Harness::default_input(), vec![Step::Hang]);
    let started = tokio::time::Instant::now();

    let run = harness
        .coordinator
        .execute(reference_pipeline(&[("mySchedulePeriod", "15 minutes")]), instant(1, 0))
        .await;

    assert!(!run.outcome.unwrap().is_success());
    let elapsed = started.elapsed();
    assert!(elapsed >= std::time::Duration::from_secs(5 * 60));
    assert!(elapsed < std::time::Duration::from_secs(50 * 60));

    let torn_down = harness
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, RunEvent::ResourceTornDown { .. }))
        .count();
    assert_eq!(torn_down, 1);
    assert_eq!(harness.compute.terminations().len(), 1);
}
