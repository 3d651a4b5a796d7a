//! Template and values documents as read from disk

use crate::core::error::TemplateError;
use crate::core::object::RawObject;
use crate::core::parameter::{ParameterValue, RawParameter};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// `pipeline.json`: `{ "objects": [...], "parameters": [...] }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub objects: Vec<RawObject>,

    #[serde(default)]
    pub parameters: Vec<RawParameter>,
}

impl PipelineDefinition {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        Self::from_json(&read(path.as_ref())?)
    }

    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Descriptive metadata carried by a values file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValuesMetadata {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// `values.json`: pipeline metadata plus parameter values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineValues {
    #[serde(default)]
    pub metadata: ValuesMetadata,

    #[serde(default)]
    pub values: BTreeMap<String, ParameterValue>,
}

impl PipelineValues {
    /// Load a values file; an unnamed pipeline takes its directory's name
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let mut values = Self::from_json(&read(path)?)?;
        if values.metadata.name.is_none() {
            values.metadata.name = directory_name(path);
        }
        Ok(values)
    }

    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply a `key=value` override on top of the file's values
    pub fn set(&mut self, id: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(id.into(), ParameterValue::Single(value.into()));
    }
}

fn read(path: &Path) -> Result<String, TemplateError> {
    std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn directory_name(path: &Path) -> Option<String> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().ok()?,
    };
    let dir = dir.canonicalize().unwrap_or(dir);
    dir.file_name().map(|name| name.to_string_lossy().into_owned())
}
