//! Data port traits
//!
//! The sole seam between repositories and a storage backend. Capabilities are
//! split into three traits so a caller can ask for exactly what it uses:
//!
//! - [`ReadPort`]: equality and advanced reads, lookups by id, search, counts
//! - [`WritePort`]: insert, update, delete
//! - [`AdvancedPort`]: stored procedures and the raw client escape hatch
//!
//! All three share [`Port`], which owns the translation of backend-native
//! failures into [`DatabaseError`]. Nothing above this boundary sees a native
//! error type.
//!
//! Traits use RPITIT (Return Position Impl Trait In Traits) so adapters can
//! write plain `async fn` without `async_trait`.
//!
//! # Contract
//!
//! - Reads return an empty `Vec` when nothing matches.
//! - [`ReadPort::get_by_id`] returns `None` on absence, never NOT_FOUND.
//! - NOT_FOUND is reserved for [`WritePort::update`] and [`WritePort::delete`]
//!   of a missing id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

use crate::error::{DatabaseError, ErrorContext};
use crate::ids::RowId;
use crate::query::{ByIdOptions, CountOptions, FilterOperator, QueryOptions};

/// A row as a JSON object
pub type Row = serde_json::Map<String, Value>;

/// Result type for port operations
pub type PortResult<T> = std::result::Result<T, DatabaseError>;

/// Privilege level a port instance was created at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Ordinary client, subject to row-level policies
    #[default]
    Standard,
    /// Service-role client that bypasses row-level policies
    Elevated,
}

impl AccessLevel {
    /// Whether this level is at least `required`
    pub fn satisfies(self, required: AccessLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Elevated => write!(f, "elevated"),
        }
    }
}

/// Behavior shared by every port capability
pub trait Port: Send + Sync {
    /// The backend's own error type
    type NativeError: std::error::Error + Send + Sync + 'static;

    /// Privilege level this instance was created at
    fn access_level(&self) -> AccessLevel;

    /// Translate a native failure into a [`DatabaseError`]
    fn handle_error(
        &self,
        error: Self::NativeError,
        operation: Option<&str>,
        context: ErrorContext,
    ) -> DatabaseError;
}

/// Read capability
pub trait ReadPort: Port {
    /// Rows whose columns equal every entry of `filters` (`null` means IS NULL)
    fn get(&self, table: &str, filters: &Row) -> impl Future<Output = PortResult<Vec<Row>>> + Send;

    /// Rows selected by a full [`QueryOptions`]
    fn get_advanced(
        &self,
        table: &str,
        options: &QueryOptions,
    ) -> impl Future<Output = PortResult<Vec<Row>>> + Send;

    /// The row whose `id` equals `id`, if any
    fn get_by_id(
        &self,
        table: &str,
        id: &RowId,
        options: &ByIdOptions,
    ) -> impl Future<Output = PortResult<Option<Row>>> + Send;

    /// Rows where any of `columns` contains `query` (case-insensitive),
    /// further narrowed, ordered and windowed by `options`
    fn search(
        &self,
        table: &str,
        query: &str,
        columns: &[&str],
        options: &QueryOptions,
    ) -> impl Future<Output = PortResult<Vec<Row>>> + Send;

    /// Number of rows matching `options`, or of groups when it is grouped
    fn count(
        &self,
        table: &str,
        options: &CountOptions,
    ) -> impl Future<Output = PortResult<u64>> + Send;

    /// Whether this backend can evaluate `operator`
    fn supports(&self, operator: FilterOperator) -> bool {
        let _ = operator;
        true
    }
}

/// Write capability
pub trait WritePort: Port {
    /// Insert a row and return it as stored
    fn insert(&self, table: &str, data: Row) -> impl Future<Output = PortResult<Row>> + Send;

    /// Update the row with `id`; NOT_FOUND when it does not exist
    fn update(
        &self,
        table: &str,
        id: &RowId,
        data: Row,
    ) -> impl Future<Output = PortResult<Row>> + Send;

    /// Delete the row with `id`; NOT_FOUND when it does not exist
    fn delete(&self, table: &str, id: &RowId) -> impl Future<Output = PortResult<()>> + Send;
}

/// Stored procedures and the raw client
pub trait AdvancedPort: Port {
    /// The underlying client handle
    type Client;

    /// Call a stored procedure with named parameters
    ///
    /// Parameter shape is a per-procedure convention.
    fn call_rpc(&self, name: &str, params: Row) -> impl Future<Output = PortResult<Value>> + Send;

    /// Escape hatch for code that must bypass the port
    fn client(&self) -> &Self::Client;
}

/// Every capability at once
pub trait DataPort: ReadPort + WritePort + AdvancedPort {}

impl<T: ReadPort + WritePort + AdvancedPort> DataPort for T {}

/// Reject options that use operators `port` cannot evaluate
pub fn ensure_supported<P: ReadPort + ?Sized>(
    port: &P,
    options: &QueryOptions,
) -> PortResult<()> {
    match options.all_filters().find(|f| !port.supports(f.operator)) {
        Some(filter) => Err(DatabaseError::query(format!(
            "operator `{}` is not supported by this backend",
            filter.operator
        ))
        .with_context(ErrorContext::new().field(filter.field.clone()))),
        None => Ok(()),
    }
}
