//! In-process reference backend
//!
//! [`MemoryStore`] implements every port capability over tables held in
//! memory. It is the backend the property tests run against and a drop-in
//! for local development.
//!
//! Clones share the same tables, so a standard and an elevated handle can be
//! taken over one dataset:
//!
//! ```rust
//! use qms_dataport::backend::memory::MemoryStore;
//! use qms_dataport::port::{AccessLevel, Port};
//! use serde_json::json;
//!
//! let admin = MemoryStore::builder()
//!     .table("categories", vec![json!({"id": 1, "name": "Haircut"})])
//!     .unique("categories", "name")
//!     .access(AccessLevel::Elevated)
//!     .build();
//! let anon = admin.with_access(AccessLevel::Standard);
//! assert_eq!(anon.access_level(), AccessLevel::Standard);
//! ```

mod eval;

use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub use eval::Tables;

use crate::error::{DatabaseError, DatabaseErrorType, ErrorContext};
use crate::ids::RowId;
use crate::port::{
    ensure_supported, AccessLevel, AdvancedPort, Port, PortResult, ReadPort, Row, WritePort,
};
use crate::query::{ByIdOptions, CountOptions, FilterOperator, QueryFilter, QueryOptions};

/// Stored-procedure body: reads the tables, returns a JSON result
pub type RpcHandler = Arc<dyn Fn(&Tables, &Row) -> Result<Value, String> + Send + Sync>;

/// Native failures of the in-memory backend
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// Table was never defined
    #[error("relation \"{0}\" does not exist")]
    UnknownTable(String),

    /// Unique column already holds the value
    #[error("duplicate key value violates unique constraint on {table}.{column} ({value})")]
    Duplicate {
        /// Table
        table: String,
        /// Unique column
        column: String,
        /// Offending value
        value: String,
    },

    /// Foreign key points at a missing row, or a delete would orphan rows
    #[error("{table}.{column} = {value} violates foreign key to {references}")]
    ForeignKey {
        /// Referencing table
        table: String,
        /// Referencing column
        column: String,
        /// Offending value
        value: String,
        /// Referenced table
        references: String,
    },

    /// No row with the requested id
    #[error("no row in {table} with id {id}")]
    MissingRow {
        /// Table
        table: String,
        /// Requested id
        id: String,
    },

    /// Operator cannot be evaluated here
    #[error("operator `{0}` is not supported by the in-memory backend")]
    UnsupportedOperator(FilterOperator),

    /// LIKE pattern did not compile
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Function was never registered
    #[error("function {0} does not exist")]
    UnknownFunction(String),

    /// Function body reported a failure
    #[error("function {name} failed: {message}")]
    FunctionFailed {
        /// Function name
        name: String,
        /// Reported failure
        message: String,
    },
}

impl MemoryStoreError {
    fn kind(&self) -> DatabaseErrorType {
        match self {
            Self::UnknownTable(_) | Self::UnknownFunction(_) => DatabaseErrorType::SchemaError,
            Self::Duplicate { .. } => DatabaseErrorType::DuplicateEntry,
            Self::ForeignKey { .. } => DatabaseErrorType::ForeignKeyViolation,
            Self::MissingRow { .. } => DatabaseErrorType::NotFound,
            Self::UnsupportedOperator(_) | Self::Pattern(_) => DatabaseErrorType::QueryError,
            Self::FunctionFailed { .. } => DatabaseErrorType::OperationFailed,
        }
    }

    fn context(&self) -> ErrorContext {
        match self {
            Self::UnknownTable(table) => ErrorContext::for_table(table.clone()),
            Self::Duplicate { table, column, .. } | Self::ForeignKey { table, column, .. } => {
                ErrorContext::for_table(table.clone()).field(column.clone())
            }
            Self::MissingRow { table, id } => {
                ErrorContext::for_table(table.clone()).entity_id(id)
            }
            Self::UnknownFunction(name) | Self::FunctionFailed { name, .. } => {
                ErrorContext::new().detail("function", name)
            }
            Self::UnsupportedOperator(_) | Self::Pattern(_) => ErrorContext::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Schema {
    unique: Vec<(String, String)>,
    foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    table: String,
    column: String,
    references: String,
}

struct Shared {
    tables: RwLock<Tables>,
    schema: Schema,
    rpcs: DashMap<String, RpcHandler>,
}

/// Tables, constraints and functions held in process memory
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    access: AccessLevel,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("access", &self.access)
            .field("functions", &self.shared.rpcs.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`MemoryStore`]
#[derive(Default)]
pub struct MemoryStoreBuilder {
    tables: Tables,
    schema: Schema,
    rpcs: Vec<(String, RpcHandler)>,
    access: AccessLevel,
}

impl MemoryStoreBuilder {
    /// Define a table with initial rows; non-object values are skipped
    pub fn table(mut self, name: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect();
        self.tables.insert(name.into(), rows);
        self
    }

    /// Declare a unique column
    pub fn unique(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.schema.unique.push((table.into(), column.into()));
        self
    }

    /// Declare `table.column` as referencing `references.id`
    pub fn foreign_key(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        self.schema.foreign_keys.push(ForeignKey {
            table: table.into(),
            column: column.into(),
            references: references.into(),
        });
        self
    }

    /// Register a stored procedure
    pub fn rpc<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Tables, &Row) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.rpcs.push((name.into(), Arc::new(handler)));
        self
    }

    /// Privilege level of the built handle
    pub fn access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    /// Build the store
    pub fn build(self) -> MemoryStore {
        let rpcs = DashMap::new();
        for (name, handler) in self.rpcs {
            rpcs.insert(name, handler);
        }
        MemoryStore {
            shared: Arc::new(Shared {
                tables: RwLock::new(self.tables),
                schema: self.schema,
                rpcs,
            }),
            access: self.access,
        }
    }
}

impl MemoryStore {
    /// Empty store at `access`
    pub fn new(access: AccessLevel) -> Self {
        Self::builder().access(access).build()
    }

    /// Start a builder
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Handle over the same data at another privilege level
    pub fn with_access(&self, access: AccessLevel) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            access,
        }
    }

    /// Define an empty table if it does not exist yet
    pub async fn create_table(&self, name: &str) {
        self.shared
            .tables
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    /// Register or replace a stored procedure
    pub fn register_rpc<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Tables, &Row) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.shared.rpcs.insert(name.into(), Arc::new(handler));
    }

    /// Copy of a table's rows, if defined
    pub async fn snapshot(&self, table: &str) -> Option<Vec<Row>> {
        self.shared.tables.read().await.get(table).cloned()
    }

    fn check(&self, options: &QueryOptions, operation: &str, table: &str) -> PortResult<()> {
        options
            .validate()
            .and_then(|_| ensure_supported(self, options))
            .map_err(|e| {
                e.with_operation(operation)
                    .merge_context(ErrorContext::for_table(table))
            })
    }

    fn fail(&self, operation: &str, table: &str) -> impl Fn(MemoryStoreError) -> DatabaseError + '_ {
        let operation = operation.to_string();
        let table = table.to_string();
        move |e| self.handle_error(e, Some(&operation), ErrorContext::for_table(table.clone()))
    }

    async fn select(
        &self,
        table: &str,
        options: &QueryOptions,
        search: Option<(&str, &[&str])>,
    ) -> Result<Vec<Row>, MemoryStoreError> {
        let tables = self.shared.tables.read().await;
        let rows = eval::joined_rows(&tables, table, &options.joins)?;
        let mut rows = eval::filter_rows(rows, &options.filters, table)?;
        if let Some((query, columns)) = search {
            let needle = query.to_lowercase();
            rows.retain(|row| {
                columns.iter().any(|column| {
                    eval::lookup(row, column, table)
                        .and_then(eval::search_text)
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
                })
            });
        }
        eval::finish(rows, options, table)
    }

    fn check_unique(
        &self,
        rows: &[Row],
        table: &str,
        data: &Row,
        skip: Option<usize>,
    ) -> Result<(), MemoryStoreError> {
        let columns = std::iter::once("id").chain(
            self.shared
                .schema
                .unique
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, c)| c.as_str()),
        );
        for column in columns {
            let Some(value) = data.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = rows.iter().enumerate().any(|(i, row)| {
                Some(i) != skip && row.get(column).is_some_and(|v| eval::values_equal(v, value))
            });
            if taken {
                return Err(MemoryStoreError::Duplicate {
                    table: table.to_string(),
                    column: column.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_references(
        &self,
        tables: &Tables,
        table: &str,
        data: &Row,
    ) -> Result<(), MemoryStoreError> {
        for fk in self.shared.schema.foreign_keys.iter().filter(|fk| fk.table == table) {
            let Some(value) = data.get(&fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = tables.get(&fk.references).is_some_and(|rows| {
                rows.iter()
                    .any(|row| row.get("id").is_some_and(|id| eval::values_equal(id, value)))
            });
            if !exists {
                return Err(MemoryStoreError::ForeignKey {
                    table: table.to_string(),
                    column: fk.column.clone(),
                    value: value.to_string(),
                    references: fk.references.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_not_referenced(
        &self,
        tables: &Tables,
        table: &str,
        id: &Value,
    ) -> Result<(), MemoryStoreError> {
        for fk in self.shared.schema.foreign_keys.iter().filter(|fk| fk.references == table) {
            let referenced = tables.get(&fk.table).is_some_and(|rows| {
                rows.iter()
                    .any(|row| row.get(&fk.column).is_some_and(|v| eval::values_equal(v, id)))
            });
            if referenced {
                return Err(MemoryStoreError::ForeignKey {
                    table: fk.table.clone(),
                    column: fk.column.clone(),
                    value: id.to_string(),
                    references: table.to_string(),
                });
            }
        }
        Ok(())
    }

    fn position(rows: &[Row], table: &str, id: &RowId) -> Result<usize, MemoryStoreError> {
        rows.iter()
            .position(|row| row.get("id").is_some_and(|v| id.matches(v)))
            .ok_or_else(|| MemoryStoreError::MissingRow {
                table: table.to_string(),
                id: id.to_string(),
            })
    }

    async fn insert_row(&self, table: &str, mut data: Row) -> Result<Row, MemoryStoreError> {
        let mut tables = self.shared.tables.write().await;
        if !tables.contains_key(table) {
            return Err(MemoryStoreError::UnknownTable(table.to_string()));
        }
        self.check_references(&tables, table, &data)?;

        let rows = tables
            .get_mut(table)
            .ok_or_else(|| MemoryStoreError::UnknownTable(table.to_string()))?;
        if data.get("id").map_or(true, Value::is_null) {
            let next = rows
                .iter()
                .filter_map(|row| row.get("id").and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            data.insert("id".to_string(), Value::from(next));
        }
        self.check_unique(rows, table, &data, None)?;
        rows.push(data.clone());
        Ok(data)
    }

    async fn update_row(&self, table: &str, id: &RowId, data: Row) -> Result<Row, MemoryStoreError> {
        let mut tables = self.shared.tables.write().await;
        if !tables.contains_key(table) {
            return Err(MemoryStoreError::UnknownTable(table.to_string()));
        }
        self.check_references(&tables, table, &data)?;

        let rows = tables
            .get_mut(table)
            .ok_or_else(|| MemoryStoreError::UnknownTable(table.to_string()))?;
        let index = Self::position(rows, table, id)?;
        let mut merged = rows[index].clone();
        merged.extend(data);
        self.check_unique(rows, table, &merged, Some(index))?;
        rows[index] = merged.clone();
        Ok(merged)
    }

    async fn delete_row(&self, table: &str, id: &RowId) -> Result<(), MemoryStoreError> {
        let mut tables = self.shared.tables.write().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| MemoryStoreError::UnknownTable(table.to_string()))?;
        let index = Self::position(rows, table, id)?;
        let stored_id = rows[index].get("id").cloned().unwrap_or(Value::Null);
        self.check_not_referenced(&tables, table, &stored_id)?;

        if let Some(rows) = tables.get_mut(table) {
            rows.remove(index);
        }
        Ok(())
    }
}

impl Port for MemoryStore {
    type NativeError = MemoryStoreError;

    fn access_level(&self) -> AccessLevel {
        self.access
    }

    fn handle_error(
        &self,
        error: MemoryStoreError,
        operation: Option<&str>,
        context: ErrorContext,
    ) -> DatabaseError {
        let mut err = DatabaseError::new(error.kind(), error.to_string())
            .with_context(error.context())
            .merge_context(context);
        if let Some(op) = operation {
            err = err.with_operation(op);
        }
        tracing::warn!(
            kind = %err.kind,
            operation = operation.unwrap_or("unknown"),
            retriable = err.is_retriable(),
            "memory store error: {}",
            err.message
        );
        err.with_source(error)
    }
}

impl ReadPort for MemoryStore {
    async fn get(&self, table: &str, filters: &Row) -> PortResult<Vec<Row>> {
        tracing::debug!(table, operation = "get", "memory port call");
        let options = QueryOptions {
            filters: QueryFilter::from_equality_map(filters),
            ..QueryOptions::default()
        };
        self.select(table, &options, None)
            .await
            .map_err(self.fail("get", table))
    }

    async fn get_advanced(&self, table: &str, options: &QueryOptions) -> PortResult<Vec<Row>> {
        tracing::debug!(table, operation = "get_advanced", "memory port call");
        self.check(options, "get_advanced", table)?;
        self.select(table, options, None)
            .await
            .map_err(self.fail("get_advanced", table))
    }

    async fn get_by_id(
        &self,
        table: &str,
        id: &RowId,
        options: &ByIdOptions,
    ) -> PortResult<Option<Row>> {
        tracing::debug!(table, operation = "get_by_id", id = %id, "memory port call");
        let query = options.to_query_options();
        self.check(&query, "get_by_id", table)?;

        let tables = self.shared.tables.read().await;
        let rows = eval::joined_rows(&tables, table, &query.joins)
            .map_err(self.fail("get_by_id", table))?;
        let columns = query.columns();
        Ok(rows
            .into_iter()
            .find(|row| eval::lookup(row, "id", table).is_some_and(|v| id.matches(v)))
            .map(|row| eval::project(row, &columns, table)))
    }

    async fn search(
        &self,
        table: &str,
        query: &str,
        columns: &[&str],
        options: &QueryOptions,
    ) -> PortResult<Vec<Row>> {
        tracing::debug!(table, operation = "search", query, "memory port call");
        if columns.is_empty() {
            return Err(DatabaseError::validation("search needs at least one column")
                .with_operation("search")
                .with_context(ErrorContext::for_table(table)));
        }
        self.check(options, "search", table)?;
        self.select(table, options, Some((query, columns)))
            .await
            .map_err(self.fail("search", table))
    }

    async fn count(&self, table: &str, options: &CountOptions) -> PortResult<u64> {
        tracing::debug!(table, operation = "count", mode = ?options.mode, "memory port call");
        let query = options.to_query_options();
        self.check(&query, "count", table)?;

        let tables = self.shared.tables.read().await;
        let rows = eval::joined_rows(&tables, table, &query.joins)
            .and_then(|rows| eval::filter_rows(rows, &query.filters, table))
            .and_then(|rows| eval::finish(rows, &query, table))
            .map_err(self.fail("count", table))?;
        Ok(rows.len() as u64)
    }

    fn supports(&self, operator: FilterOperator) -> bool {
        operator != FilterOperator::Match
    }
}

impl WritePort for MemoryStore {
    async fn insert(&self, table: &str, data: Row) -> PortResult<Row> {
        tracing::debug!(table, operation = "insert", "memory port call");
        self.insert_row(table, data)
            .await
            .map_err(self.fail("insert", table))
    }

    async fn update(&self, table: &str, id: &RowId, data: Row) -> PortResult<Row> {
        tracing::debug!(table, operation = "update", id = %id, "memory port call");
        self.update_row(table, id, data)
            .await
            .map_err(self.fail("update", table))
    }

    async fn delete(&self, table: &str, id: &RowId) -> PortResult<()> {
        tracing::debug!(table, operation = "delete", id = %id, "memory port call");
        self.delete_row(table, id)
            .await
            .map_err(self.fail("delete", table))
    }
}

impl AdvancedPort for MemoryStore {
    type Client = Self;

    async fn call_rpc(&self, name: &str, params: Row) -> PortResult<Value> {
        tracing::debug!(function = name, operation = "call_rpc", "memory port call");
        let handler = self.shared.rpcs.get(name).map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            return Err(self.handle_error(
                MemoryStoreError::UnknownFunction(name.to_string()),
                Some("call_rpc"),
                ErrorContext::new(),
            ));
        };
        let tables = self.shared.tables.read().await;
        handler(&tables, &params).map_err(|message| {
            self.handle_error(
                MemoryStoreError::FunctionFailed {
                    name: name.to_string(),
                    message,
                },
                Some("call_rpc"),
                ErrorContext::new(),
            )
        })
    }

    fn client(&self) -> &Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{JoinType, QueryJoin, QuerySort};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture rows must be objects"),
        }
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    fn fixture() -> MemoryStore {
        MemoryStore::builder()
            .table(
                "categories",
                vec![
                    json!({"id": 1, "name": "Haircut", "status": "active", "created_at": "2024-01-01T09:00:00Z"}),
                    json!({"id": 2, "name": "Coloring", "status": "inactive", "created_at": "2024-02-01T09:00:00Z"}),
                    json!({"id": 3, "name": "Shave", "status": "active", "created_at": "2024-03-01T09:00:00Z"}),
                ],
            )
            .table(
                "shops",
                vec![
                    json!({"id": 10, "name": "North"}),
                    json!({"id": 11, "name": "South"}),
                ],
            )
            .table(
                "queues",
                vec![
                    json!({"id": 100, "shop_id": 10, "name": "Walk-ins", "status": "open"}),
                    json!({"id": 101, "shop_id": 99, "name": "Orphan", "status": "closed"}),
                ],
            )
            .unique("categories", "name")
            .foreign_key("queues", "shop_id", "shops")
            .build()
    }

    #[tokio::test]
    async fn test_filter_and_sort_returns_active_newest_first() {
        let store = fixture();
        let options = QueryOptions::new()
            .filter(QueryFilter::eq("status", "active"))
            .sort(QuerySort::desc("created_at"));
        let rows = store.get_advanced("categories", &options).await.unwrap();
        assert_eq!(ids(&rows), vec![3, 1]);
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_row() {
        let store = fixture();
        let join = QueryJoin::new("shops", "shop_id", "id").alias("shop");

        let inner = store
            .get_advanced("queues", &QueryOptions::new().join(join.clone()))
            .await
            .unwrap();
        assert_eq!(ids(&inner), vec![100]);
        assert_eq!(inner[0]["shop"]["name"], json!("North"));

        let left = store
            .get_advanced("queues", &QueryOptions::new().join(join.kind(JoinType::Left)))
            .await
            .unwrap();
        assert_eq!(ids(&left), vec![100, 101]);
        assert!(left[1]["shop"].is_null());
    }

    #[tokio::test]
    async fn test_right_and_full_joins() {
        let store = fixture();
        let join = QueryJoin::new("shops", "shop_id", "id").alias("shop");

        let right = store
            .get_advanced("queues", &QueryOptions::new().join(join.clone().kind(JoinType::Right)))
            .await
            .unwrap();
        assert_eq!(right.len(), 2);
        assert_eq!(right[1]["shop"]["name"], json!("South"));
        assert!(right[1].get("id").is_none());

        let full = store
            .get_advanced("queues", &QueryOptions::new().join(join.kind(JoinType::Full)))
            .await
            .unwrap();
        assert_eq!(full.len(), 3);
    }

    #[tokio::test]
    async fn test_filter_on_joined_column() {
        let store = fixture();
        let options = QueryOptions::new()
            .join(QueryJoin::new("shops", "shop_id", "id").alias("shop").kind(JoinType::Left))
            .filter(QueryFilter::eq("shop.name", "North"))
            .select("id, shop.name");
        let rows = store.get_advanced("queues", &options).await.unwrap();
        assert_eq!(rows, vec![row(json!({"id": 100, "name": "North"}))]);
    }

    #[tokio::test]
    async fn test_empty_and_absent() {
        let store = fixture();
        let rows = store
            .get("categories", &row(json!({"status": "archived"})))
            .await
            .unwrap();
        assert!(rows.is_empty());

        let missing = store
            .get_by_id("categories", &RowId::from(404), &ByIdOptions::new())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_with_projection_and_join() {
        let store = fixture();
        let options = ByIdOptions::new()
            .select("id, shop")
            .join(QueryJoin::new("shops", "shop_id", "id").alias("shop"));
        let found = store
            .get_by_id("queues", &RowId::from(100), &options)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["shop"]["name"], json!("North"));
        assert!(found.get("status").is_none());
    }

    #[tokio::test]
    async fn test_get_treats_null_as_is_null() {
        let store = fixture();
        store
            .insert("categories", row(json!({"name": "Beard", "status": null})))
            .await
            .unwrap();
        let rows = store
            .get("categories", &row(json!({"status": null})))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Beard"));
    }

    #[tokio::test]
    async fn test_pagination_windows() {
        let store = fixture();
        let base = QueryOptions::new().sort(QuerySort::asc("id"));
        let page2 = store
            .get_advanced("categories", &base.clone().paginate(2, 2))
            .await
            .unwrap();
        assert_eq!(ids(&page2), vec![3]);
        let range = store
            .get_advanced("categories", &base.range(1, 1))
            .await
            .unwrap();
        assert_eq!(ids(&range), vec![2]);
    }

    #[tokio::test]
    async fn test_count_ignores_window() {
        let store = fixture();
        let options = CountOptions::new().filter(QueryFilter::eq("status", "active"));
        assert_eq!(store.count("categories", &options).await.unwrap(), 2);
        assert_eq!(store.count("categories", &CountOptions::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_across_columns() {
        let store = fixture();
        let rows = store
            .search("categories", "SHA", &["name", "status"], &QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec![3]);

        let narrowed = store
            .search(
                "categories",
                "a",
                &["name"],
                &QueryOptions::new()
                    .filter(QueryFilter::eq("status", "active"))
                    .sort(QuerySort::desc("id")),
            )
            .await
            .unwrap();
        assert_eq!(ids(&narrowed), vec![3, 1]);
    }

    #[tokio::test]
    async fn test_search_requires_columns() {
        let store = fixture();
        let err = store
            .search("categories", "x", &[], &QueryOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ValidationError);
    }

    #[tokio::test]
    async fn test_group_by_counts() {
        let store = fixture();
        let options = QueryOptions::new()
            .group_by("status")
            .sort(QuerySort::asc("status"));
        let rows = store.get_advanced("categories", &options).await.unwrap();
        assert_eq!(
            rows,
            vec![
                row(json!({"status": "active", "count": 2})),
                row(json!({"status": "inactive", "count": 1})),
            ]
        );
    }

    #[tokio::test]
    async fn test_grouped_count_counts_groups() {
        let store = fixture();
        let grouped = CountOptions::new().group_by("status");
        assert_eq!(store.count("categories", &grouped).await.unwrap(), 2);

        let busy = grouped.having(QueryFilter::gt("count", 1));
        assert_eq!(store.count("categories", &busy).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_having_without_group_by_is_ignored() {
        let store = fixture();
        let options = QueryOptions::new().having(QueryFilter::gt("count", 100));
        let rows = store.get_advanced("categories", &options).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_match_operator_is_query_error() {
        let store = fixture();
        let options = QueryOptions::new().filter(QueryFilter::text_match("name", "hair"));
        let err = store.get_advanced("categories", &options).await.unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::QueryError);
        assert_eq!(err.operation.as_deref(), Some("get_advanced"));
    }

    #[tokio::test]
    async fn test_malformed_filter_fails_before_execution() {
        let store = fixture();
        let options = QueryOptions::new().filter(QueryFilter {
            field: "status".into(),
            operator: FilterOperator::In,
            value: "active".into(),
        });
        let err = store.get_advanced("categories", &options).await.unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ValidationError);
        assert_eq!(err.context.table.as_deref(), Some("categories"));
    }

    #[tokio::test]
    async fn test_unknown_table_is_schema_error() {
        let store = fixture();
        let err = store
            .get_advanced("nope", &QueryOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::SchemaError);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store = fixture();
        let inserted = store
            .insert("categories", row(json!({"name": "Nails", "status": "active"})))
            .await
            .unwrap();
        assert_eq!(inserted["id"], json!(4));
        assert_eq!(store.snapshot("categories").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_unique_column() {
        let store = fixture();
        let err = store
            .insert("categories", row(json!({"name": "Haircut"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::DuplicateEntry);
        assert_eq!(err.context.field.as_deref(), Some("name"));

        let err = store
            .insert("categories", row(json!({"id": 1, "name": "Other"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::DuplicateEntry);
        assert_eq!(err.context.field.as_deref(), Some("id"));
    }

    #[tokio::test]
    async fn test_foreign_keys() {
        let store = fixture();
        let err = store
            .insert("queues", row(json!({"shop_id": 12345, "name": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ForeignKeyViolation);

        let err = store.delete("shops", &RowId::from(10)).await.unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ForeignKeyViolation);

        store.delete("shops", &RowId::from(11)).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_merges_and_checks_existence() {
        let store = fixture();
        let updated = store
            .update("categories", &RowId::from(2), row(json!({"status": "active"})))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("Coloring"));
        assert_eq!(updated["status"], json!("active"));

        let err = store
            .update("categories", &RowId::from(99), row(json!({"status": "active"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::NotFound);
        assert_eq!(err.context.entity_id.as_deref(), Some("99"));

        let err = store
            .update("categories", &RowId::from(2), row(json!({"name": "Shave"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::DuplicateEntry);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = fixture();
        store.delete("categories", &RowId::from(1)).await.unwrap();
        let err = store
            .delete("categories", &RowId::from(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::NotFound);
    }

    #[tokio::test]
    async fn test_rpc_registry() {
        let store = fixture();
        store.register_rpc("count_rows", |tables, params| {
            let table = params
                .get("p_table")
                .and_then(Value::as_str)
                .ok_or("p_table is required")?;
            let rows = tables.get(table).ok_or_else(|| format!("no table {table}"))?;
            Ok(json!([{ "total": rows.len() }]))
        });

        let result = store
            .call_rpc("count_rows", row(json!({"p_table": "shops"})))
            .await
            .unwrap();
        assert_eq!(result, json!([{ "total": 2 }]));

        let err = store.call_rpc("count_rows", Row::new()).await.unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::OperationFailed);

        let err = store.call_rpc("missing_fn", Row::new()).await.unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::SchemaError);
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let admin = fixture().with_access(AccessLevel::Elevated);
        let anon = admin.with_access(AccessLevel::Standard);
        admin.create_table("audit").await;
        anon.insert("audit", row(json!({"event": "login"})))
            .await
            .unwrap();
        assert_eq!(admin.snapshot("audit").await.unwrap().len(), 1);
        assert_eq!(anon.access_level(), AccessLevel::Standard);
        assert_eq!(admin.client().access_level(), AccessLevel::Elevated);
    }
}
