//! Bounded-context repositories built on the data port
//!
//! Each repository maps rows to its entities and every failure through its
//! context's domain error type.

pub mod category;
pub mod dashboard;
pub mod queue;

pub use category::{Category, CategoryRepository, CategoryUpdate, NewCategory};
pub use dashboard::{join_reads, load_dashboard, DashboardSummary};
pub use queue::{Queue, QueueRepository, QueueStats, QueueStatus};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::port::Row;
use crate::repository::RepositoryError;

/// Decode a row into an entity
pub(crate) fn decode<T: DeserializeOwned>(
    row: Row,
    entity: &str,
    operation: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| {
        RepositoryError::operation_failed(operation, format!("could not decode {} row: {}", entity, e))
    })
}

/// Encode a write payload as a row
pub(crate) fn encode<T: Serialize>(
    value: &T,
    entity: &str,
    operation: &str,
) -> Result<Row, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(other) => Err(RepositoryError::operation_failed(
            operation,
            format!("{} payload must be an object, got {}", entity, other),
        )),
        Err(e) => Err(RepositoryError::operation_failed(
            operation,
            format!("could not encode {} payload: {}", entity, e),
        )),
    }
}
