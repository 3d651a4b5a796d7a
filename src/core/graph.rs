//! Dependency graph over pipeline objects
//!
//! References are resolved once into `ObjectId` indices. An object that
//! references another depends on it, so referenced objects (schedules,
//! resources, data nodes) come first in execution order.

use crate::core::error::GraphError;
use crate::core::object::{ObjectType, PipelineObject};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Index of an object in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    object_type: ObjectType,
    dependencies: Vec<ObjectId>,
    dependents: Vec<ObjectId>,
}

/// Acyclic graph of object references
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, ObjectId>,
    order: Vec<ObjectId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate ids, dangling references and cycles
    pub fn build(objects: &[PipelineObject]) -> Result<Self, GraphError> {
        let mut index = HashMap::new();
        for (i, object) in objects.iter().enumerate() {
            if index.insert(object.id.clone(), ObjectId(i)).is_some() {
                return Err(GraphError::DuplicateObject(object.id.clone()));
            }
        }

        let mut nodes: Vec<Node> = objects
            .iter()
            .map(|object| Node {
                id: object.id.clone(),
                object_type: object.object_type,
                dependencies: Vec::new(),
                dependents: Vec::new(),
            })
            .collect();

        for (i, object) in objects.iter().enumerate() {
            for (field, target) in object.references() {
                let target_id = *index.get(target).ok_or_else(|| GraphError::DanglingReference {
                    object: object.id.clone(),
                    field: field.to_string(),
                    target: target.to_string(),
                })?;
                if !nodes[i].dependencies.contains(&target_id) {
                    nodes[i].dependencies.push(target_id);
                    nodes[target_id.0].dependents.push(ObjectId(i));
                }
            }
        }

        let order = Self::topological_sort(&nodes)?;
        Ok(Self { nodes, index, order })
    }

    /// Depth-first topological sort in declaration order
    fn topological_sort(nodes: &[Node]) -> Result<Vec<ObjectId>, GraphError> {
        let mut marks = vec![Mark::Unvisited; nodes.len()];
        let mut order = Vec::with_capacity(nodes.len());
        let mut path = Vec::new();

        for i in 0..nodes.len() {
            Self::visit(ObjectId(i), nodes, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        id: ObjectId,
        nodes: &[Node],
        marks: &mut [Mark],
        path: &mut Vec<ObjectId>,
        order: &mut Vec<ObjectId>,
    ) -> Result<(), GraphError> {
        match marks[id.0] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|p| nodes[p.0].id.clone()).collect();
                cycle.push(nodes[id.0].id.clone());
                return Err(GraphError::CyclicReference { path: cycle });
            }
            Mark::Unvisited => {}
        }

        marks[id.0] = Mark::InProgress;
        path.push(id);
        for dep in &nodes[id.0].dependencies {
            Self::visit(*dep, nodes, marks, path, order)?;
        }
        path.pop();
        marks[id.0] = Mark::Done;
        order.push(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn lookup(&self, id: &str) -> Option<ObjectId> {
        self.index.get(id).copied()
    }

    pub fn id(&self, object: ObjectId) -> &str {
        &self.nodes[object.0].id
    }

    pub fn object_type(&self, object: ObjectId) -> ObjectType {
        self.nodes[object.0].object_type
    }

    /// Producers before consumers
    pub fn execution_order(&self) -> &[ObjectId] {
        &self.order
    }

    /// Objects this one references directly
    pub fn dependencies(&self, object: ObjectId) -> &[ObjectId] {
        &self.nodes[object.0].dependencies
    }

    /// Objects referencing this one directly
    pub fn dependents(&self, object: ObjectId) -> &[ObjectId] {
        &self.nodes[object.0].dependents
    }

    /// Everything that depends on `object`, directly or transitively
    pub fn transitive_dependents(&self, object: ObjectId) -> BTreeSet<ObjectId> {
        self.walk(object, |id| self.dependents(id))
    }

    /// Everything `object` depends on, directly or transitively
    pub fn transitive_dependencies(&self, object: ObjectId) -> BTreeSet<ObjectId> {
        self.walk(object, |id| self.dependencies(id))
    }

    fn walk<'a, F>(&'a self, from: ObjectId, next: F) -> BTreeSet<ObjectId>
    where
        F: Fn(ObjectId) -> &'a [ObjectId],
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ObjectId> = next(from).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id) {
                queue.extend(next(id).iter().copied());
            }
        }
        seen
    }

    /// Ids of objects of the given type, in execution order
    pub fn of_type(&self, object_type: ObjectType) -> Vec<ObjectId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.object_type(*id) == object_type)
            .collect()
    }
}
