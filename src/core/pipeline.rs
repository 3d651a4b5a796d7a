//! Pipeline domain model

use crate::core::context::EvaluationContext;
use crate::core::error::{ExpressionError, ScheduleError, TemplateError};
use crate::core::evaluator::{Evaluator, FieldError, Value};
use crate::core::graph::{DependencyGraph, ObjectId};
use crate::core::object::{ObjectType, PipelineObject, RawObject, DEFAULT_OBJECT_ID};
use crate::core::parameter::{Parameter, ParameterSet};
use crate::core::period::{parse_datetime, Period};
use crate::core::schedule::Schedule;
use crate::core::state::RerunPolicy;
use crate::core::template::{PipelineDefinition, PipelineValues};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Fields every object of a type must define, and whether each is a reference
const REQUIRED_FIELDS: &[(ObjectType, &str, Option<ObjectType>)] = &[
    (ObjectType::Schedule, "period", None),
    (ObjectType::Schedule, "startDateTime", None),
    (ObjectType::S3DataNode, "directoryPath", None),
    (ObjectType::ShellCommandActivity, "command", None),
    (ObjectType::ShellCommandActivity, "runsOn", Some(ObjectType::Ec2Resource)),
];

/// Optional references whose target type is fixed
const TYPED_REFERENCES: &[(&str, ObjectType)] = &[
    ("schedule", ObjectType::Schedule),
    ("runsOn", ObjectType::Ec2Resource),
    ("input", ObjectType::S3DataNode),
    ("output", ObjectType::S3DataNode),
];

/// A pipeline's objects evaluated for its next due instant
#[derive(Debug, Clone)]
pub struct Validation {
    pub pipeline_name: String,
    /// Instant the objects were evaluated for
    pub instant: Option<DateTime<Utc>>,
    /// The schedule has no instant left, so its start was used
    pub schedule_exhausted: bool,
    pub evaluated: Vec<PipelineObject>,
    /// `(object id, message)` for everything that failed
    pub errors: Vec<(String, String)>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A loaded, validated pipeline template
///
/// Shared read-only between runs; every run evaluates its own copy of the
/// objects.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    pub description: Option<String>,

    /// Objects after `Default` inheritance, indexed by `ObjectId`
    objects: Vec<PipelineObject>,

    parameters: Arc<ParameterSet>,

    graph: DependencyGraph,

    /// The schedule governing the pipeline
    schedule_object: ObjectId,

    rerun_policy: RerunPolicy,
}

impl Pipeline {
    /// Load a template and its values file from disk
    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(
        template: P,
        values: Q,
        overrides: &[(String, String)],
    ) -> Result<Self, TemplateError> {
        let definition = PipelineDefinition::from_file(template)?;
        let mut values = PipelineValues::from_file(values)?;
        for (id, value) in overrides {
            values.set(id.clone(), value.clone());
        }
        Self::load(definition, values)
    }

    /// Build a pipeline from parsed documents
    pub fn load(
        definition: PipelineDefinition,
        values: PipelineValues,
    ) -> Result<Self, TemplateError> {
        let mut objects = definition
            .objects
            .into_iter()
            .map(Self::classify)
            .collect::<Result<Vec<_>, _>>()?;
        Self::inherit_defaults(&mut objects);

        let graph = DependencyGraph::build(&objects)?;
        for object in &objects {
            Self::validate_object(object, &graph)?;
        }
        let schedule_object = Self::governing_schedule(&objects, &graph)?;
        let rerun_policy = Self::rerun_policy_of(&objects)?;

        let declared = definition
            .parameters
            .into_iter()
            .map(Parameter::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        let mut parameters = ParameterSet::new(declared);
        for (id, value) in values.values {
            parameters.supply(&id, value)?;
        }

        Ok(Pipeline {
            name: values.metadata.name.unwrap_or_else(|| "pipeline".to_string()),
            description: values.metadata.description,
            objects,
            parameters: Arc::new(parameters),
            graph,
            schedule_object,
            rerun_policy,
        })
    }

    fn classify(raw: RawObject) -> Result<PipelineObject, TemplateError> {
        let object_type = match raw.object_type.as_deref() {
            Some(tag) => ObjectType::from_tag(tag).ok_or_else(|| TemplateError::UnsupportedType {
                object: raw.id.clone(),
                object_type: tag.to_string(),
            })?,
            None if raw.id == DEFAULT_OBJECT_ID => ObjectType::Default,
            None => {
                return Err(TemplateError::MissingField {
                    object: raw.id,
                    field: "type".to_string(),
                })
            }
        };
        Ok(PipelineObject {
            id: raw.id,
            name: raw.name,
            object_type,
            fields: raw.fields,
        })
    }

    /// Copy `Default` fields into inheriting objects that lack them
    fn inherit_defaults(objects: &mut [PipelineObject]) {
        let Some(defaults) = objects
            .iter()
            .find(|o| o.object_type == ObjectType::Default)
            .map(|o| o.fields.clone())
        else {
            return;
        };

        for object in objects.iter_mut().filter(|o| o.object_type.inherits_defaults()) {
            for (key, value) in &defaults {
                object
                    .fields
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    fn validate_object(
        object: &PipelineObject,
        graph: &DependencyGraph,
    ) -> Result<(), TemplateError> {
        for (object_type, field, reference) in REQUIRED_FIELDS {
            if object.object_type != *object_type {
                continue;
            }
            let value = object.field(field).ok_or_else(|| TemplateError::MissingField {
                object: object.id.clone(),
                field: field.to_string(),
            })?;
            let well_formed = match reference {
                Some(_) => value.as_reference().is_some(),
                None => value.as_text().is_some(),
            };
            if !well_formed {
                return Err(TemplateError::InvalidField {
                    object: object.id.clone(),
                    field: field.to_string(),
                    reason: match reference {
                        Some(_) => "expected a reference".to_string(),
                        None => "expected a string".to_string(),
                    },
                });
            }
        }

        for (field, expected) in TYPED_REFERENCES {
            if let Some(target) = object.reference(field) {
                let target_type = graph.lookup(target).map(|id| graph.object_type(id));
                if target_type != Some(*expected) {
                    return Err(TemplateError::WrongReference {
                        object: object.id.clone(),
                        field: field.to_string(),
                        expected: expected.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn governing_schedule(
        objects: &[PipelineObject],
        graph: &DependencyGraph,
    ) -> Result<ObjectId, TemplateError> {
        let named = objects
            .iter()
            .find(|o| o.object_type == ObjectType::Default)
            .and_then(|o| o.reference("schedule"))
            .and_then(|target| graph.lookup(target));
        if let Some(id) = named {
            return Ok(id);
        }

        match graph.of_type(ObjectType::Schedule).as_slice() {
            [] => Err(TemplateError::MissingSchedule),
            [only] => Ok(*only),
            many => Err(TemplateError::AmbiguousSchedule(many.len())),
        }
    }

    fn rerun_policy_of(objects: &[PipelineObject]) -> Result<RerunPolicy, TemplateError> {
        let Some(default) = objects.iter().find(|o| o.object_type == ObjectType::Default) else {
            return Ok(RerunPolicy::default());
        };
        match default.text("failureAndRerunMode") {
            None => Ok(RerunPolicy::default()),
            Some(mode) => RerunPolicy::from_mode(mode).ok_or_else(|| TemplateError::InvalidField {
                object: default.id.clone(),
                field: "failureAndRerunMode".to_string(),
                reason: format!("unknown mode '{}' (expected CASCADE or NONE)", mode),
            }),
        }
    }

    /// Get an object by arena id
    pub fn object(&self, id: ObjectId) -> &PipelineObject {
        &self.objects[id.index()]
    }

    /// Get an object by template id
    pub fn object_by_id(&self, id: &str) -> Option<&PipelineObject> {
        self.graph.lookup(id).map(|id| self.object(id))
    }

    pub fn objects(&self) -> &[PipelineObject] {
        &self.objects
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn parameters(&self) -> Arc<ParameterSet> {
        Arc::clone(&self.parameters)
    }

    pub fn schedule_object(&self) -> ObjectId {
        self.schedule_object
    }

    pub fn rerun_policy(&self) -> RerunPolicy {
        self.rerun_policy
    }

    /// Evaluate the governing schedule against the parameters alone
    pub fn schedule(&self, max_passes: usize) -> Result<Schedule, ScheduleError> {
        let context = EvaluationContext::new(self.parameters()).with_max_passes(max_passes);
        let evaluator = Evaluator::new(&context);
        let object = self.object(self.schedule_object);

        let field = |name: &str| -> Result<Option<String>, ScheduleError> {
            object
                .text(name)
                .map(|text| {
                    evaluator
                        .evaluate_str(text)
                        .map_err(|error| ScheduleError::Expression {
                            field: name.to_string(),
                            error,
                        })
                })
                .transpose()
        };

        let period = field("period")?
            .ok_or_else(|| ScheduleError::InvalidSchedule("no period".to_string()))?;
        let start = field("startDateTime")?
            .ok_or_else(|| ScheduleError::InvalidSchedule("no startDateTime".to_string()))?;

        let mut schedule = Schedule::new(parse_datetime(&start)?, Period::parse(&period)?)?;
        if let Some(end) = field("endDateTime")? {
            schedule = schedule.with_end(parse_datetime(&end)?);
        }
        if let Some(occurrences) = field("occurrences")? {
            let count = occurrences.trim().parse::<u32>().map_err(|_| {
                ScheduleError::InvalidSchedule(format!(
                    "occurrences '{}' is not a count",
                    occurrences
                ))
            })?;
            schedule = schedule.with_occurrences(count);
        }
        Ok(schedule)
    }

    /// Evaluation context for the firing at `scheduled_start`
    pub fn context_for(
        &self,
        scheduled_start: DateTime<Utc>,
        period: Period,
        max_passes: usize,
    ) -> EvaluationContext {
        EvaluationContext::for_instant(self.parameters(), scheduled_start, period)
            .with_runtime("pipelineName", Value::Text(self.name.clone()))
            .with_max_passes(max_passes)
    }

    /// Resolve one parameter without any runtime variables
    pub fn parameter_value(&self, id: &str, max_passes: usize) -> Result<Value, ExpressionError> {
        let context = EvaluationContext::new(self.parameters()).with_max_passes(max_passes);
        Evaluator::new(&context).evaluate_parameter(id)
    }

    /// Evaluate every object for the first instant due at or after `now`
    pub fn validate(&self, now: DateTime<Utc>, max_passes: usize) -> Validation {
        let mut validation = Validation {
            pipeline_name: self.name.clone(),
            instant: None,
            schedule_exhausted: false,
            evaluated: Vec::new(),
            errors: Vec::new(),
        };
        let schedule_id = self.graph.id(self.schedule_object).to_string();

        let schedule = match self.schedule(max_passes) {
            Ok(schedule) => schedule,
            Err(e) => {
                validation.errors.push((schedule_id, e.to_string()));
                return validation;
            }
        };
        let instant = match schedule.next_due(now) {
            Ok(Some(due)) => due,
            Ok(None) => {
                validation.schedule_exhausted = true;
                schedule.start
            }
            Err(e) => {
                validation.errors.push((schedule_id, e.to_string()));
                return validation;
            }
        };
        validation.instant = Some(instant);

        let context = self.context_for(instant, schedule.period(), max_passes);
        for (object, result) in self.objects.iter().zip(self.evaluate(&context)) {
            match result {
                Ok(evaluated) => validation.evaluated.push(evaluated),
                Err(e) => validation.errors.push((object.id.clone(), e.to_string())),
            }
        }
        validation
    }

    /// Evaluate every object in arena order
    pub fn evaluate(&self, context: &EvaluationContext) -> Vec<Result<PipelineObject, FieldError>> {
        let evaluator = Evaluator::new(context);
        self.objects
            .iter()
            .map(|object| evaluator.evaluate_object(object))
            .collect()
    }
}
