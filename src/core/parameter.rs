//! Pipeline parameters and their supplied values

use crate::core::error::TemplateError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Declared primitive type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Integer,
    Double,
    Boolean,
    ObjectKey,
}

impl ParameterType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "String" => Some(ParameterType::String),
            "Integer" => Some(ParameterType::Integer),
            "Double" => Some(ParameterType::Double),
            "Boolean" => Some(ParameterType::Boolean),
            "AWS::S3::ObjectKey" => Some(ParameterType::ObjectKey),
            _ => None,
        }
    }

    /// Check one supplied (already literal) value against the type
    fn check(self, value: &str) -> Result<(), String> {
        match self {
            ParameterType::String => Ok(()),
            ParameterType::Integer => value
                .trim()
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not an integer", value)),
            ParameterType::Double => value
                .trim()
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("'{}' is not a number", value)),
            ParameterType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("'{}' is not true or false", value)),
            },
            ParameterType::ObjectKey => {
                if value.starts_with("s3://") {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an s3:// object key", value))
                }
            }
        }
    }
}

/// `"true"` or `true`, as both spellings appear in templates
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

/// A parameter as written in the template
#[derive(Debug, Clone, Deserialize)]
pub struct RawParameter {
    pub id: String,

    #[serde(rename = "type", default = "default_parameter_type")]
    pub parameter_type: String,

    #[serde(default)]
    pub default: Option<ParameterValue>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "isArray", default)]
    is_array: Option<Flag>,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub id: String,
    pub parameter_type: ParameterType,
    /// Default value, possibly an unevaluated expression
    pub default: Option<ParameterValue>,
    pub description: Option<String>,
    pub is_array: bool,
}

impl Parameter {
    pub fn new(id: impl Into<String>, parameter_type: ParameterType) -> Self {
        Self {
            id: id.into(),
            parameter_type,
            default: None,
            description: None,
            is_array: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(ParameterValue::Single(default.into()));
        self
    }

    pub(crate) fn from_raw(raw: RawParameter) -> Result<Self, TemplateError> {
        let parameter_type = ParameterType::from_tag(&raw.parameter_type).ok_or_else(|| {
            TemplateError::UnknownParameterType {
                id: raw.id.clone(),
                parameter_type: raw.parameter_type.clone(),
            }
        })?;
        Ok(Self {
            id: raw.id,
            parameter_type,
            default: raw.default,
            description: raw.description,
            is_array: raw.is_array.as_ref().is_some_and(Flag::is_set),
        })
    }
}

/// A supplied or default parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Single(String),
    List(Vec<String>),
}

impl ParameterValue {
    pub fn items(&self) -> Vec<&str> {
        match self {
            ParameterValue::Single(s) => vec![s.as_str()],
            ParameterValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Single(value.to_string())
    }
}

/// All declared parameters plus the values supplied for this pipeline
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    declared: BTreeMap<String, Parameter>,
    supplied: HashMap<String, ParameterValue>,
}

impl ParameterSet {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self {
            declared: parameters.into_iter().map(|p| (p.id.clone(), p)).collect(),
            supplied: HashMap::new(),
        }
    }

    /// Supply a value, validating it against the declaration
    pub fn supply(&mut self, id: &str, value: ParameterValue) -> Result<(), TemplateError> {
        let parameter = self
            .declared
            .get(id)
            .ok_or_else(|| TemplateError::UndeclaredParameter(id.to_string()))?;

        if matches!(value, ParameterValue::List(_)) && !parameter.is_array {
            return Err(TemplateError::InvalidParameterValue {
                id: id.to_string(),
                reason: "array supplied for a non-array parameter".to_string(),
            });
        }

        for item in value.items() {
            parameter
                .parameter_type
                .check(item)
                .map_err(|reason| TemplateError::InvalidParameterValue {
                    id: id.to_string(),
                    reason,
                })?;
        }

        self.supplied.insert(id.to_string(), value);
        Ok(())
    }

    pub fn declared(&self, id: &str) -> Option<&Parameter> {
        self.declared.get(id)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.declared.values()
    }

    pub fn supplied(&self, id: &str) -> Option<&ParameterValue> {
        self.supplied.get(id)
    }

    /// Supplied value, falling back to the declared default
    pub fn raw_value(&self, id: &str) -> Option<&ParameterValue> {
        self.supplied
            .get(id)
            .or_else(|| self.declared.get(id).and_then(|p| p.default.as_ref()))
    }
}
