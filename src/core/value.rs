use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Stored form of one object: field name to JSON value, links held as
/// primary keys.
pub type Record = serde_json::Map<String, JsonValue>;

/// Primary key of a stored object. Integer and string keys are supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self::Text(s.clone())),
            JsonValue::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(v) => JsonValue::from(*v),
            Self::Text(s) => JsonValue::String(s.clone()),
        }
    }

    /// True when `value` is this key, or a JSON array containing it.
    pub fn is_referenced_by(&self, value: &JsonValue) -> bool {
        match value {
            JsonValue::Array(items) => items
                .iter()
                .any(|item| PrimaryKey::from_json(item).as_ref() == Some(self)),
            other => PrimaryKey::from_json(other).as_ref() == Some(self),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PrimaryKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for PrimaryKey {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Identity of a stored object across every registered type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub type_name: String,
    pub primary_key: PrimaryKey,
}

impl ObjectKey {
    pub fn new(type_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            type_name: type_name.into(),
            primary_key,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.primary_key)
    }
}
