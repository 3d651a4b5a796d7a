//! Pipelines sharing one template, one per values file

use crate::core::error::TemplateError;
use crate::core::pipeline::{Pipeline, Validation};
use crate::core::template::{PipelineDefinition, PipelineValues};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the values file inside a pipeline directory
pub const VALUES_FILE: &str = "values.json";

/// One pipeline of a set and the directory it was loaded from
#[derive(Debug, Clone)]
pub struct PipelineEntry {
    pub pipeline: Arc<Pipeline>,
    pub dir: PathBuf,
}

/// A template instantiated once per values file
///
/// Pipeline names are unique within a set. The set is validated as a whole:
/// callers run or upload nothing unless every member validates.
#[derive(Debug, Clone)]
pub struct PipelineSet {
    template: PipelineDefinition,
    entries: Vec<PipelineEntry>,
}

impl PipelineSet {
    pub fn new(template: PipelineDefinition) -> Self {
        Self {
            template,
            entries: Vec::new(),
        }
    }

    pub fn from_template<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        Ok(Self::new(PipelineDefinition::from_file(path)?))
    }

    /// Add the pipeline at `source`, a pipeline directory or a values file
    pub fn add_pipeline(
        &mut self,
        source: &Path,
        overrides: &[(String, String)],
    ) -> Result<&PipelineEntry, TemplateError> {
        let values_path = if source.is_dir() {
            source.join(VALUES_FILE)
        } else {
            source.to_path_buf()
        };
        let mut values = PipelineValues::from_file(&values_path)?;
        for (id, value) in overrides {
            values.set(id.clone(), value.clone());
        }
        let dir = match values_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.add_values(values, dir)
    }

    /// Add a pipeline from already parsed values
    pub fn add_values(
        &mut self,
        values: PipelineValues,
        dir: PathBuf,
    ) -> Result<&PipelineEntry, TemplateError> {
        let pipeline = Pipeline::load(self.template.clone(), values)?;
        if self.get(&pipeline.name).is_some() {
            return Err(TemplateError::DuplicatePipeline(pipeline.name));
        }
        let index = self.entries.len();
        self.entries.push(PipelineEntry {
            pipeline: Arc::new(pipeline),
            dir,
        });
        Ok(&self.entries[index])
    }

    pub fn get(&self, name: &str) -> Option<&PipelineEntry> {
        self.entries.iter().find(|entry| entry.pipeline.name == name)
    }

    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.entries.iter().map(|entry| &entry.pipeline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate every member, in the order they were added
    pub fn validate(&self, now: DateTime<Utc>, max_passes: usize) -> Vec<Validation> {
        self.pipelines()
            .map(|pipeline| pipeline.validate(now, max_passes))
            .collect()
    }

    /// True when every member validates
    pub fn are_pipelines_valid(&self, now: DateTime<Utc>, max_passes: usize) -> bool {
        self.validate(now, max_passes).iter().all(Validation::is_valid)
    }
}
