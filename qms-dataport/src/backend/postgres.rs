//! PostgreSQL data port over a `sqlx` connection pool

use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, Postgres};
use sqlx::query::QueryScalar;
use sqlx::types::Json;
use std::time::Duration;

use super::sql::{self, SqlParam, SqlQuery};
use crate::config::DatabaseConfig;
use crate::error::{sanitize_url, DatabaseError, Error, ErrorContext, Result};
use crate::ids::RowId;
use crate::port::{
    ensure_supported, AccessLevel, AdvancedPort, Port, PortResult, ReadPort, Row, WritePort,
};
use crate::query::{ByIdOptions, CountMode, CountOptions, QueryFilter, QueryOptions};

/// `estimated` counts at or below this planner estimate are recounted exactly
const EXACT_COUNT_THRESHOLD: u64 = 1_000;

const MAX_BACKOFF_EXPONENT: u32 = 16;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Data port backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgDataPort {
    pool: PgPool,
    access: AccessLevel,
}

impl PgDataPort {
    /// Connect at `access`, retrying with exponential backoff
    ///
    /// Elevated ports connect through `admin_url`; its absence is a
    /// configuration error.
    pub async fn connect(config: &DatabaseConfig, access: AccessLevel) -> Result<Self> {
        let url = match access {
            AccessLevel::Standard => config.url.as_str(),
            AccessLevel::Elevated => config.admin_url.as_deref().ok_or_else(|| {
                Error::InvalidConfig(
                    "database.admin_url is required for an elevated connection".to_string(),
                )
            })?,
        };
        let pool = connect_with_retries(config, url).await?;
        Ok(Self::from_pool(pool, access))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, access: AccessLevel) -> Self {
        Self { pool, access }
    }

    fn fail(&self, operation: &'static str, table: &str) -> impl Fn(sqlx::Error) -> DatabaseError + '_ {
        let table = table.to_string();
        move |err| self.handle_error(err, Some(operation), ErrorContext::for_table(table.clone()))
    }

    async fn fetch_rows(&self, operation: &'static str, table: &str, query: SqlQuery) -> PortResult<Vec<Row>> {
        let query = sql::rows_as_json(query);
        tracing::debug!(table, operation, sql = %query.sql, "postgres port call");
        let rows = bind_all(sqlx::query_scalar::<_, Json<Value>>(&query.sql), query.params)
            .fetch_all(&self.pool)
            .await
            .map_err(self.fail(operation, table))?;
        rows.into_iter()
            .map(|Json(value)| into_row(value, operation, table))
            .collect()
    }

    async fn fetch_optional_row(
        &self,
        operation: &'static str,
        table: &str,
        query: SqlQuery,
    ) -> PortResult<Option<Row>> {
        tracing::debug!(table, operation, sql = %query.sql, "postgres port call");
        let row = bind_all(sqlx::query_scalar::<_, Json<Value>>(&query.sql), query.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.fail(operation, table))?;
        row.map(|Json(value)| into_row(value, operation, table))
            .transpose()
    }

    async fn estimate(&self, table: &str, options: &CountOptions) -> PortResult<u64> {
        let query = sql::count_estimate(table, options).map_err(scoped("count", table))?;
        tracing::debug!(table, operation = "count", sql = %query.sql, "postgres port call");
        let Json(plan) = bind_all(sqlx::query_scalar::<_, Json<Value>>(&query.sql), query.params)
            .fetch_one(&self.pool)
            .await
            .map_err(self.fail("count", table))?;
        plan_rows(&plan).ok_or_else(|| {
            DatabaseError::query("planner output carried no row estimate")
                .with_operation("count")
                .with_context(ErrorContext::for_table(table))
        })
    }
}

async fn connect_with_retries(config: &DatabaseConfig, url: &str) -> Result<PgPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_connect(config, url).await {
            Ok(pool) => {
                tracing::info!(
                    url = %sanitize_url(url),
                    attempts = attempt + 1,
                    max_connections = config.max_connections,
                    "database pool ready"
                );
                return Ok(pool);
            }
            Err(err) => {
                attempt += 1;
                if attempt > config.max_retries || !err.is_retriable() {
                    tracing::error!(
                        url = %sanitize_url(url),
                        attempts = attempt,
                        kind = %err.kind,
                        "giving up on database connection: {}",
                        err
                    );
                    return Err(err.into());
                }

                let delay = retry_delay(base_delay, attempt);
                tracing::warn!(
                    attempt,
                    ?delay,
                    "database connection failed: {}; retrying",
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// `base * 2^(attempt-1)`, capped at [`MAX_RETRY_DELAY`]
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

async fn try_connect(config: &DatabaseConfig, url: &str) -> PortResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(url)
        .await
        .map_err(|e| {
            DatabaseError::from(e)
                .with_operation("connect")
                .with_context(ErrorContext::new().detail("url", sanitize_url(url)))
        })
}

type Scalar<'q, O> = QueryScalar<'q, Postgres, O, PgArguments>;

fn bind_all<'q, O>(mut query: Scalar<'q, O>, params: Vec<SqlParam>) -> Scalar<'q, O> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(v),
            SqlParam::Int(v) => query.bind(v),
            SqlParam::Float(v) => query.bind(v),
            SqlParam::Text(v) => query.bind(v),
            SqlParam::Uuid(v) => query.bind(v),
            SqlParam::Timestamp(v) => query.bind(v),
            SqlParam::Json(v) => query.bind(Json(v)),
            SqlParam::BoolArray(v) => query.bind(v),
            SqlParam::IntArray(v) => query.bind(v),
            SqlParam::FloatArray(v) => query.bind(v),
            SqlParam::TextArray(v) => query.bind(v),
            SqlParam::UuidArray(v) => query.bind(v),
        };
    }
    query
}

fn scoped(operation: &'static str, table: &str) -> impl Fn(DatabaseError) -> DatabaseError + '_ {
    move |err| {
        err.with_operation(operation)
            .merge_context(ErrorContext::for_table(table))
    }
}

fn into_row(value: Value, operation: &str, table: &str) -> PortResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(DatabaseError::query(format!("expected a row object, got {}", other))
            .with_operation(operation)
            .with_context(ErrorContext::for_table(table))),
    }
}

/// Row estimate from `EXPLAIN (FORMAT JSON)` output
fn plan_rows(plan: &Value) -> Option<u64> {
    plan.get(0)?
        .get("Plan")?
        .get("Plan Rows")?
        .as_f64()
        .map(|rows| rows.max(0.0).round() as u64)
}

impl Port for PgDataPort {
    type NativeError = sqlx::Error;

    fn access_level(&self) -> AccessLevel {
        self.access
    }

    fn handle_error(
        &self,
        error: sqlx::Error,
        operation: Option<&str>,
        context: ErrorContext,
    ) -> DatabaseError {
        let mut err = DatabaseError::from(error).merge_context(context);
        if let Some(op) = operation {
            err = err.with_operation(op);
        }
        tracing::warn!(
            kind = %err.kind,
            operation = err.operation.as_deref().unwrap_or("unknown"),
            retriable = err.is_retriable(),
            "postgres error: {}",
            err.message
        );
        err
    }
}

impl ReadPort for PgDataPort {
    async fn get(&self, table: &str, filters: &Row) -> PortResult<Vec<Row>> {
        let options = QueryFilter::from_equality_map(filters)
            .into_iter()
            .fold(QueryOptions::new(), QueryOptions::filter);
        let query = sql::select(table, &options).map_err(scoped("get", table))?;
        self.fetch_rows("get", table, query).await
    }

    async fn get_advanced(&self, table: &str, options: &QueryOptions) -> PortResult<Vec<Row>> {
        ensure_supported(self, options).map_err(scoped("get_advanced", table))?;
        let query = sql::select(table, options).map_err(scoped("get_advanced", table))?;
        self.fetch_rows("get_advanced", table, query).await
    }

    async fn get_by_id(
        &self,
        table: &str,
        id: &RowId,
        options: &ByIdOptions,
    ) -> PortResult<Option<Row>> {
        let query = sql::select_by_id(table, id, options).map_err(scoped("get_by_id", table))?;
        self.fetch_optional_row("get_by_id", table, sql::rows_as_json(query))
            .await
    }

    async fn search(
        &self,
        table: &str,
        query: &str,
        columns: &[&str],
        options: &QueryOptions,
    ) -> PortResult<Vec<Row>> {
        ensure_supported(self, options).map_err(scoped("search", table))?;
        let rendered =
            sql::search(table, query, columns, options).map_err(scoped("search", table))?;
        self.fetch_rows("search", table, rendered).await
    }

    async fn count(&self, table: &str, options: &CountOptions) -> PortResult<u64> {
        match options.mode {
            CountMode::Exact => self.exact_count(table, options).await,
            CountMode::Planned => self.estimate(table, options).await,
            CountMode::Estimated => {
                let estimate = self.estimate(table, options).await?;
                if estimate <= EXACT_COUNT_THRESHOLD {
                    self.exact_count(table, options).await
                } else {
                    Ok(estimate)
                }
            }
        }
    }
}

impl PgDataPort {
    async fn exact_count(&self, table: &str, options: &CountOptions) -> PortResult<u64> {
        let query = sql::count(table, options).map_err(scoped("count", table))?;
        tracing::debug!(table, operation = "count", sql = %query.sql, "postgres port call");
        let total = bind_all(sqlx::query_scalar::<_, i64>(&query.sql), query.params)
            .fetch_one(&self.pool)
            .await
            .map_err(self.fail("count", table))?;
        Ok(total.max(0) as u64)
    }
}

impl WritePort for PgDataPort {
    async fn insert(&self, table: &str, data: Row) -> PortResult<Row> {
        let query = sql::insert(table, &data).map_err(scoped("insert", table))?;
        self.fetch_optional_row("insert", table, query)
            .await?
            .ok_or_else(|| {
                DatabaseError::operation_failed("insert returned no row")
                    .with_operation("insert")
                    .with_context(ErrorContext::for_table(table))
            })
    }

    async fn update(&self, table: &str, id: &RowId, data: Row) -> PortResult<Row> {
        let query = sql::update(table, id, &data).map_err(scoped("update", table))?;
        self.fetch_optional_row("update", table, query)
            .await?
            .ok_or_else(|| {
                DatabaseError::not_found(format!("no row with id {} in {}", id, table))
                    .with_operation("update")
                    .with_context(ErrorContext::for_table(table).entity_id(id))
            })
    }

    async fn delete(&self, table: &str, id: &RowId) -> PortResult<()> {
        let query = sql::delete(table, id).map_err(scoped("delete", table))?;
        tracing::debug!(table, operation = "delete", sql = %query.sql, "postgres port call");
        let deleted = bind_all(sqlx::query_scalar::<_, Json<Value>>(&query.sql), query.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(self.fail("delete", table))?;
        match deleted {
            Some(_) => Ok(()),
            None => Err(
                DatabaseError::not_found(format!("no row with id {} in {}", id, table))
                    .with_operation("delete")
                    .with_context(ErrorContext::for_table(table).entity_id(id)),
            ),
        }
    }
}

impl AdvancedPort for PgDataPort {
    type Client = PgPool;

    async fn call_rpc(&self, name: &str, params: Row) -> PortResult<Value> {
        let query = sql::call(name, &params).map_err(|e| {
            e.with_operation("call_rpc")
                .merge_context(ErrorContext::new().detail("function", name))
        })?;
        tracing::debug!(function = name, operation = "call_rpc", sql = %query.sql, "postgres port call");
        let Json(value) = bind_all(sqlx::query_scalar::<_, Json<Value>>(&query.sql), query.params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                self.handle_error(
                    e,
                    Some("call_rpc"),
                    ErrorContext::new().detail("function", name),
                )
            })?;
        Ok(value)
    }

    fn client(&self) -> &PgPool {
        &self.pool
    }
}
