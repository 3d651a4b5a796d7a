//! Pipeline objects as they appear in a template's `objects` array

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Id of the root configuration object
pub const DEFAULT_OBJECT_ID: &str = "Default";

/// Kind of pipeline object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Default,
    Schedule,
    Ec2Resource,
    S3DataNode,
    ShellCommandActivity,
}

impl ObjectType {
    /// Map a template `type` tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Default" => Some(ObjectType::Default),
            "Schedule" => Some(ObjectType::Schedule),
            "Ec2Resource" => Some(ObjectType::Ec2Resource),
            "S3DataNode" => Some(ObjectType::S3DataNode),
            "ShellCommandActivity" => Some(ObjectType::ShellCommandActivity),
            _ => None,
        }
    }

    pub fn is_activity(self) -> bool {
        self == ObjectType::ShellCommandActivity
    }

    pub fn is_resource(self) -> bool {
        self == ObjectType::Ec2Resource
    }

    /// Whether this object inherits fields from `Default`
    pub fn inherits_defaults(self) -> bool {
        matches!(
            self,
            ObjectType::Ec2Resource | ObjectType::S3DataNode | ObjectType::ShellCommandActivity
        )
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ObjectType::Default => "Default",
            ObjectType::Schedule => "Schedule",
            ObjectType::Ec2Resource => "Ec2Resource",
            ObjectType::S3DataNode => "S3DataNode",
            ObjectType::ShellCommandActivity => "ShellCommandActivity",
        };
        f.write_str(tag)
    }
}

/// `{ "ref": "<id>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    #[serde(rename = "ref")]
    pub target: String,
}

/// Value of an object field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Reference(ObjectRef),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn reference(target: impl Into<String>) -> Self {
        FieldValue::Reference(ObjectRef {
            target: target.into(),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match self {
            FieldValue::Reference(r) => Some(&r.target),
            _ => None,
        }
    }

    /// All reference targets, including those nested in lists
    pub fn references(&self) -> Vec<&str> {
        match self {
            FieldValue::Text(_) => Vec::new(),
            FieldValue::Reference(r) => vec![r.target.as_str()],
            FieldValue::List(items) => items.iter().flat_map(FieldValue::references).collect(),
        }
    }
}

/// A pipeline object as written in the template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObject {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub object_type: Option<String>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// A validated pipeline object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineObject {
    pub id: String,
    pub name: Option<String>,
    pub object_type: ObjectType,
    pub fields: BTreeMap<String, FieldValue>,
}

impl PipelineObject {
    pub fn new(id: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            id: id.into(),
            name: None,
            object_type,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter (handy in tests)
    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(key, FieldValue::Text(value.into()))
    }

    pub fn with_ref(self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_field(key, FieldValue::reference(target))
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(FieldValue::as_text)
    }

    pub fn reference(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(FieldValue::as_reference)
    }

    /// (field, target) for every reference held by this object
    pub fn references(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .flat_map(|(key, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |target| (key.as_str(), target))
            })
            .collect()
    }
}
