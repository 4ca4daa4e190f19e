//! Filter operators, values and conditions
//!
//! A [`QueryFilter`] is checked against its operator's value-shape rules when
//! it is built with [`QueryFilter::new`], and again by
//! [`QueryOptions::validate`](super::QueryOptions::validate) before any
//! adapter executes it. A malformed filter never reaches SQL generation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{DatabaseError, ErrorContext};

/// Comparison operators for filter conditions
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::FilterOperator;
///
/// assert_eq!(FilterOperator::Ilike.to_string(), "ilike");
/// assert_eq!(FilterOperator::StartsWith.to_string(), "starts_with");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Case-sensitive pattern (`%` any run, `_` one char)
    Like,
    /// Case-insensitive pattern
    Ilike,
    /// Value is one of a list
    In,
    /// Identity check against null, true or false
    Is,
    /// Column (array or object) contains the value
    Contains,
    /// Column array shares an element with the value
    Overlaps,
    /// Full-text match
    Match,
    /// Case-sensitive prefix
    StartsWith,
    /// Case-sensitive suffix
    EndsWith,
}

impl FilterOperator {
    /// Every operator
    pub const ALL: [FilterOperator; 15] = [
        Self::Eq,
        Self::Neq,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Like,
        Self::Ilike,
        Self::In,
        Self::Is,
        Self::Contains,
        Self::Overlaps,
        Self::Match,
        Self::StartsWith,
        Self::EndsWith,
    ];

    /// Stable lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::In => "in",
            Self::Is => "is",
            Self::Contains => "contains",
            Self::Overlaps => "overlaps",
            Self::Match => "match",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
        }
    }

    /// Check that `value` has the shape this operator expects
    pub fn check_value(&self, value: &FilterValue) -> Result<(), String> {
        match self {
            Self::Eq | Self::Neq => match value {
                FilterValue::Null => Err(format!("`{}` cannot compare against null, use `is`", self)),
                FilterValue::List(_) => Err(format!("`{}` expects a single value, got a list", self)),
                _ => Ok(()),
            },
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => match value {
                FilterValue::Integer(_)
                | FilterValue::Float(_)
                | FilterValue::String(_)
                | FilterValue::Timestamp(_)
                | FilterValue::Uuid(_) => Ok(()),
                other => Err(format!(
                    "`{}` expects an orderable scalar, got {}",
                    self,
                    other.shape()
                )),
            },
            Self::Like | Self::Ilike | Self::Match | Self::StartsWith | Self::EndsWith => {
                match value {
                    FilterValue::String(_) => Ok(()),
                    other => Err(format!("`{}` expects a string, got {}", self, other.shape())),
                }
            }
            Self::In => match value {
                FilterValue::List(items) if items.iter().all(FilterValue::is_scalar) => Ok(()),
                FilterValue::List(_) => Err("`in` list items must be scalar values".to_string()),
                other => Err(format!("`in` expects a list, got {}", other.shape())),
            },
            Self::Is => match value {
                FilterValue::Null | FilterValue::Bool(_) => Ok(()),
                other => Err(format!(
                    "`is` expects null, true or false, got {}",
                    other.shape()
                )),
            },
            Self::Contains => match value {
                FilterValue::List(_) | FilterValue::Json(Value::Object(_) | Value::Array(_)) => {
                    Ok(())
                }
                other => Err(format!(
                    "`contains` expects a list or JSON document, got {}",
                    other.shape()
                )),
            },
            Self::Overlaps => match value {
                FilterValue::List(_) => Ok(()),
                other => Err(format!("`overlaps` expects a list, got {}", other.shape())),
            },
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that can be used in filter conditions
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::FilterValue;
///
/// let string_val: FilterValue = "active".into();
/// let int_val: FilterValue = 42_i64.into();
/// let list_val: FilterValue = vec!["open", "paused"].into();
/// assert!(matches!(list_val, FilterValue::List(ref v) if v.len() == 2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Null
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// String value
    String(String),
    /// UUID value
    Uuid(Uuid),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
    /// List of values (for `in`, `contains`, `overlaps`)
    List(Vec<FilterValue>),
    /// Arbitrary JSON document
    Json(Value),
}

impl FilterValue {
    /// Whether this is a single non-list value
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Json(_))
    }

    /// JSON representation used for comparisons against stored rows
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::String(s) => Value::String(s.clone()),
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Timestamp(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Json(v) => v.clone(),
        }
    }

    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "a boolean",
            Self::Integer(_) => "an integer",
            Self::Float(_) => "a float",
            Self::String(_) => "a string",
            Self::Uuid(_) => "a uuid",
            Self::Timestamp(_) => "a timestamp",
            Self::List(_) => "a list",
            Self::Json(_) => "a JSON document",
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<u32> for FilterValue {
    fn from(n: u32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Uuid> for FilterValue {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(list: Vec<T>) -> Self {
        Self::List(list.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            object @ Value::Object(_) => Self::Json(object),
        }
    }
}

/// A single filter condition
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::{FilterOperator, QueryFilter};
///
/// let status = QueryFilter::eq("status", "active");
/// let recent = QueryFilter::gte("created_at", "2024-01-01T00:00:00Z");
/// let states = QueryFilter::in_list("status", ["open", "paused"]);
///
/// // A scalar for `in` is rejected at construction
/// assert!(QueryFilter::new("status", FilterOperator::In, "open").is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    /// The field name to filter on (`column` or `alias.column`)
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FilterValue,
}

impl QueryFilter {
    /// Create a filter, checking the value shape against the operator
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Result<Self, DatabaseError> {
        let filter = Self::unchecked(field, operator, value.into());
        filter.validate()?;
        Ok(filter)
    }

    fn unchecked(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Re-check the shape rules
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.field.trim().is_empty() {
            return Err(DatabaseError::validation("filter field must not be empty")
                .with_context(ErrorContext::new().detail("operator", self.operator)));
        }
        self.operator.check_value(&self.value).map_err(|message| {
            DatabaseError::validation(message)
                .with_context(ErrorContext::new().field(self.field.clone()))
        })
    }

    /// Equality filter (field = value)
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Eq, value.into())
    }

    /// Inequality filter (field <> value)
    pub fn neq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Neq, value.into())
    }

    /// Greater-than filter
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Gt, value.into())
    }

    /// Greater-than-or-equal filter
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Gte, value.into())
    }

    /// Less-than filter
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Lt, value.into())
    }

    /// Less-than-or-equal filter
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Lte, value.into())
    }

    /// Case-sensitive pattern filter
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// Case-insensitive pattern filter
    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::Ilike, FilterValue::String(pattern.into()))
    }

    /// Membership filter
    pub fn in_list<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let list = values.into_iter().map(Into::into).collect();
        Self::unchecked(field, FilterOperator::In, FilterValue::List(list))
    }

    /// `IS NULL` filter
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::Is, FilterValue::Null)
    }

    /// `IS TRUE` / `IS FALSE` filter
    pub fn is_bool(field: impl Into<String>, value: bool) -> Self {
        Self::unchecked(field, FilterOperator::Is, FilterValue::Bool(value))
    }

    /// Containment filter
    pub fn contains(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Contains, value.into())
    }

    /// Array overlap filter
    pub fn overlaps(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::unchecked(field, FilterOperator::Overlaps, value.into())
    }

    /// Full-text match filter
    pub fn text_match(field: impl Into<String>, query: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::Match, FilterValue::String(query.into()))
    }

    /// Prefix filter
    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::StartsWith, FilterValue::String(prefix.into()))
    }

    /// Suffix filter
    pub fn ends_with(field: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::unchecked(field, FilterOperator::EndsWith, FilterValue::String(suffix.into()))
    }

    /// Turn an equality map into filters
    ///
    /// `null` entries become `IS NULL`; arrays and objects are compared as
    /// whole JSON documents.
    pub fn from_equality_map(map: &serde_json::Map<String, Value>) -> Vec<Self> {
        map.iter()
            .map(|(field, value)| match value {
                Value::Null => Self::is_null(field.clone()),
                Value::Array(_) | Value::Object(_) => {
                    Self::eq(field.clone(), FilterValue::Json(value.clone()))
                }
                scalar => Self::eq(field.clone(), FilterValue::from(scalar.clone())),
            })
            .collect()
    }
}
