//! Failure propagation and rerun selection over the dependency graph

use crate::core::graph::{DependencyGraph, ObjectId};
use crate::core::object::ObjectType;
use crate::core::run::RunInstance;
use crate::core::state::{ObjectStatus, RerunPolicy};
use std::collections::BTreeSet;

fn is_open(status: ObjectStatus) -> bool {
    matches!(status, ObjectStatus::Pending | ObjectStatus::Running)
}

/// Cancel what a failed object takes down with it
///
/// Every pending or running transitive dependent is cancelled. Then, until
/// nothing changes, every pending or running object upstream of the failure
/// or of a cancelled dependent whose dependents have all failed or been
/// cancelled is cancelled too. Returns the objects cancelled, in the order
/// they were cancelled.
pub fn cascade_failure(
    graph: &DependencyGraph,
    run: &mut RunInstance,
    failed: ObjectId,
) -> Vec<ObjectId> {
    let mut cancelled = Vec::new();

    for id in graph.transitive_dependents(failed) {
        if is_open(run.record(id).status) {
            run.set_status(id, ObjectStatus::CascadeCancelled);
            cancelled.push(id);
        }
    }

    let mut upstream = graph.transitive_dependencies(failed);
    for &id in &cancelled {
        upstream.extend(graph.transitive_dependencies(id));
    }
    upstream.remove(&failed);
    loop {
        let mut changed = false;
        for &id in &upstream {
            let dependents = graph.dependents(id);
            if is_open(run.record(id).status)
                && !dependents.is_empty()
                && dependents
                    .iter()
                    .all(|d| run.record(*d).status.is_unsuccessful())
            {
                run.set_status(id, ObjectStatus::CascadeCancelled);
                cancelled.push(id);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    cancelled
}

/// Objects a manual rerun of `object` resets to pending
///
/// Always the object itself plus whatever it needs to run again: the
/// resources and data nodes it reaches without passing through a finished
/// activity, and any such upstream object that failed or was cancelled.
/// Under `CASCADE` its cancelled dependents are rerun as well, with their own
/// needs.
pub fn rerun_set(
    graph: &DependencyGraph,
    run: &RunInstance,
    object: ObjectId,
    policy: RerunPolicy,
) -> BTreeSet<ObjectId> {
    let mut roots = vec![object];
    if policy == RerunPolicy::Cascade {
        roots.extend(
            graph
                .transitive_dependents(object)
                .into_iter()
                .filter(|id| run.record(*id).status == ObjectStatus::CascadeCancelled),
        );
    }

    let mut reset = BTreeSet::new();
    for root in roots {
        reset.insert(root);
        let mut stack: Vec<ObjectId> = graph.dependencies(root).to_vec();
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let object_type = graph.object_type(id);
            let status = run.record(id).status;
            // A finished activity's own needs were already met
            if object_type.is_activity() && status == ObjectStatus::Succeeded {
                continue;
            }
            let stateful = matches!(object_type, ObjectType::Ec2Resource | ObjectType::S3DataNode);
            if stateful || status.is_unsuccessful() {
                reset.insert(id);
            }
            stack.extend_from_slice(graph.dependencies(id));
        }
    }
    reset
}
