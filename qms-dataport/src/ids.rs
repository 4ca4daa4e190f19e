//! Row identifiers
//!
//! Tables in the admin backend key rows by integers, UUIDs or free-form text
//! codes. [`RowId`] carries any of the three and knows how to compare itself
//! against a stored JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier of a single row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    /// Integer primary key
    Int(i64),
    /// UUID primary key
    Uuid(Uuid),
    /// Text primary key
    Text(String),
}

impl RowId {
    /// JSON representation as stored in a row
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Read an identifier back out of a stored value
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(match Uuid::parse_str(s) {
                Ok(u) => Self::Uuid(u),
                Err(_) => Self::Text(s.clone()),
            }),
            _ => None,
        }
    }

    /// Whether a stored value refers to this identifier
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int(i), Value::Number(n)) => n.as_i64() == Some(*i),
            (Self::Int(i), Value::String(s)) => s.parse::<i64>().ok() == Some(*i),
            (Self::Uuid(u), Value::String(s)) => Uuid::parse_str(s).ok() == Some(*u),
            (Self::Text(t), Value::String(s)) => t == s,
            _ => false,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for RowId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<Uuid> for RowId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl From<String> for RowId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}
