//! Several value sets over one template, sharing a coordinator

use crate::helpers::*;
use chrono::Utc;
use pipelayer::core::template::{PipelineDefinition, PipelineValues};
use pipelayer::core::{PipelineSet, RunOutcome};
use std::path::PathBuf;
use std::sync::Arc;

fn values(name: &str, output: &str) -> PipelineValues {
    let mut values = PipelineValues::from_json(VALUES).unwrap();
    values.metadata.name = Some(name.to_string());
    values.set("myS3OutputDir", output);
    values
}

fn set() -> PipelineSet {
    PipelineSet::new(PipelineDefinition::from_json(TEMPLATE).unwrap())
}

#[tokio::test]
async fn test_two_value_sets_run_side_by_side() {
    let mut set = set();
    set.add_values(values("counts-a", "s3://example-bucket/a"), PathBuf::from("a"))
        .unwrap();
    set.add_values(values("counts-b", "s3://example-bucket/b"), PathBuf::from("b"))
        .unwrap();
    assert!(set.are_pipelines_valid(Utc::now(), 16));

    let harness = Harness::new(Harness::default_input(), vec![Step::writes("count.txt", "3\n")]);
    let pipelines: Vec<_> = set.pipelines().cloned().collect();
    let (first, second) = tokio::join!(
        harness.coordinator.execute(Arc::clone(&pipelines[0]), instant(1, 0)),
        harness.coordinator.execute(Arc::clone(&pipelines[1]), instant(1, 0)),
    );

    assert_eq!(first.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(second.outcome, Some(RunOutcome::Succeeded));
    assert_eq!(first.pipeline_name, "counts-a");
    assert_eq!(second.pipeline_name, "counts-b");
    for output in [
        "s3://example-bucket/a/2024-01-01_000000",
        "s3://example-bucket/b/2024-01-01_000000",
    ] {
        let files = harness.store.files_at(output).expect(output);
        assert_eq!(files["count.txt"], "3\n");
    }
    assert_eq!(harness.compute.terminations().len(), 2);
}

#[test]
fn test_invalid_value_set_blocks_the_whole_set() {
    let mut set = set();
    set.add_values(values("counts-a", "s3://example-bucket/a"), PathBuf::from("a"))
        .unwrap();
    let mut broken = values("counts-b", "s3://example-bucket/b");
    broken.values.remove("myS3InputDir");
    set.add_values(broken, PathBuf::from("b")).unwrap();

    let validations = set.validate(Utc::now(), 16);

    assert!(validations[0].is_valid());
    assert!(!validations[1].is_valid());
    assert!(validations[1]
        .errors
        .iter()
        .any(|(object, message)| object == "S3InputLocation" && message.contains("myS3InputDir")));
    assert!(!set.are_pipelines_valid(Utc::now(), 16));
}
