pub mod errors;

pub use errors::{JobResult, SimJobError, SimJobErrorCategory};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// A single namelist value. Only booleans, numbers, strings and flat arrays of
/// those can be rendered into an input file.
pub type ParamValue = serde_json::Value;

pub type Namelist = BTreeMap<String, ParamValue>;

/// Namelist name to its flags.
pub type Parameters = BTreeMap<String, Namelist>;

/// Flat mapping of output keys to parsed values.
pub type ResultRecord = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentFolder {
    pub computer_uuid: String,
    pub remote_path: String,
}

impl ParentFolder {
    pub fn new(computer_uuid: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            computer_uuid: computer_uuid.into(),
            remote_path: remote_path.into(),
        }
    }
}

/// A (remote-origin, remote-path, destination) instruction for the execution
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteTransfer {
    pub computer_uuid: String,
    pub source_path: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    pub relative_path: String,
    pub content: String,
}

impl SandboxFile {
    pub fn new(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &ParamValue) -> Self {
        match value {
            ParamValue::Null => Self::Null,
            ParamValue::Bool(_) => Self::Bool,
            ParamValue::Number(_) => Self::Number,
            ParamValue::String(_) => Self::String,
            ParamValue::Array(_) => Self::Array,
            ParamValue::Object(_) => Self::Object,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "list",
            Self::Object => "mapping",
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Converts a float into a JSON number, mapping non-finite values to null.
pub fn number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
