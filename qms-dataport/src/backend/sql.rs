//! PostgreSQL rendering of the query model
//!
//! Every function here is pure: it turns query options into a SQL string with
//! `$n` placeholders plus the values to bind. Identifiers are validated and
//! quoted; values never appear in the SQL text.
//!
//! String filter values bind as `text`. Compare typed columns (`uuid`,
//! `timestamptz`) with [`FilterValue::Uuid`] or [`FilterValue::Timestamp`].

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DatabaseError, ErrorContext};
use crate::ids::RowId;
use crate::port::{PortResult, Row};
use crate::query::{
    parse_select, ByIdOptions, CountOptions, FilterOperator, FilterValue, JoinType, QueryFilter,
    QueryJoin, QueryOptions, QuerySort, SortDirection,
};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex should compile")
});

/// A value bound to a placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Untyped null (binds as text)
    Null,
    /// `bool`
    Bool(bool),
    /// `int8`
    Int(i64),
    /// `float8`
    Float(f64),
    /// `text`
    Text(String),
    /// `uuid`
    Uuid(Uuid),
    /// `timestamptz`
    Timestamp(DateTime<Utc>),
    /// `jsonb`
    Json(Value),
    /// `bool[]`
    BoolArray(Vec<bool>),
    /// `int8[]`
    IntArray(Vec<i64>),
    /// `float8[]`
    FloatArray(Vec<f64>),
    /// `text[]`
    TextArray(Vec<String>),
    /// `uuid[]`
    UuidArray(Vec<Uuid>),
}

/// Rendered statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlQuery {
    /// SQL text with `$n` placeholders
    pub sql: String,
    /// Values for the placeholders, in order
    pub params: Vec<SqlParam>,
}

/// Quote a single identifier after validating it
pub fn quote_ident(name: &str) -> PortResult<String> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(DatabaseError::query(format!("invalid identifier `{}`", name))
            .with_context(ErrorContext::new().field(name)))
    }
}

/// Quote `column` or `table.column`
pub fn quote_path(path: &str) -> PortResult<String> {
    match path.split_once('.') {
        Some((head, tail)) => Ok(format!("{}.{}", quote_ident(head)?, quote_ident(tail)?)),
        None => quote_ident(path),
    }
}

fn column_name(field: &str) -> &str {
    field.rsplit('.').next().unwrap_or(field)
}

/// Escape `%`, `_` and `\` so text matches literally inside a LIKE pattern
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn scalar_param(value: &FilterValue) -> PortResult<SqlParam> {
    Ok(match value {
        FilterValue::Null => SqlParam::Null,
        FilterValue::Bool(b) => SqlParam::Bool(*b),
        FilterValue::Integer(i) => SqlParam::Int(*i),
        FilterValue::Float(f) => SqlParam::Float(*f),
        FilterValue::String(s) => SqlParam::Text(s.clone()),
        FilterValue::Uuid(u) => SqlParam::Uuid(*u),
        FilterValue::Timestamp(t) => SqlParam::Timestamp(*t),
        FilterValue::Json(v) => SqlParam::Json(v.clone()),
        FilterValue::List(_) => {
            return Err(DatabaseError::query("a list cannot bind to a scalar placeholder"))
        }
    })
}

fn array_param(items: &[FilterValue]) -> PortResult<SqlParam> {
    fn collect<T>(
        items: &[FilterValue],
        pick: impl Fn(&FilterValue) -> Option<T>,
    ) -> PortResult<Vec<T>> {
        items
            .iter()
            .map(|item| {
                pick(item).ok_or_else(|| {
                    DatabaseError::query("list values must all have the same type")
                })
            })
            .collect()
    }

    Ok(match items.first() {
        None | Some(FilterValue::String(_)) => SqlParam::TextArray(collect(items, |v| match v {
            FilterValue::String(s) => Some(s.clone()),
            _ => None,
        })?),
        Some(FilterValue::Integer(_)) => SqlParam::IntArray(collect(items, |v| match v {
            FilterValue::Integer(i) => Some(*i),
            _ => None,
        })?),
        Some(FilterValue::Float(_)) => SqlParam::FloatArray(collect(items, |v| match v {
            FilterValue::Float(f) => Some(*f),
            FilterValue::Integer(i) => Some(*i as f64),
            _ => None,
        })?),
        Some(FilterValue::Bool(_)) => SqlParam::BoolArray(collect(items, |v| match v {
            FilterValue::Bool(b) => Some(*b),
            _ => None,
        })?),
        Some(FilterValue::Uuid(_)) => SqlParam::UuidArray(collect(items, |v| match v {
            FilterValue::Uuid(u) => Some(*u),
            _ => None,
        })?),
        Some(other) => {
            return Err(DatabaseError::query(format!(
                "cannot bind a list of {:?} values",
                other
            )))
        }
    })
}

fn id_param(id: &RowId) -> SqlParam {
    match id {
        RowId::Int(i) => SqlParam::Int(*i),
        RowId::Uuid(u) => SqlParam::Uuid(*u),
        RowId::Text(s) => SqlParam::Text(s.clone()),
    }
}

/// Bind a loosely typed JSON value, recognizing UUID and RFC 3339 strings
fn json_param(value: &Value) -> SqlParam {
    match value {
        Value::Null => SqlParam::Null,
        Value::Bool(b) => SqlParam::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlParam::Int(i),
            None => SqlParam::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => {
            if let Ok(u) = Uuid::parse_str(s) {
                SqlParam::Uuid(u)
            } else if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                SqlParam::Timestamp(t.with_timezone(&Utc))
            } else {
                SqlParam::Text(s.clone())
            }
        }
        other => SqlParam::Json(other.clone()),
    }
}

struct Builder<'a> {
    table: &'a str,
    params: Vec<SqlParam>,
}

impl<'a> Builder<'a> {
    fn new(table: &'a str) -> PortResult<Self> {
        quote_ident(table)?;
        Ok(Self {
            table,
            params: Vec::new(),
        })
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    fn finish(self, sql: String) -> SqlQuery {
        SqlQuery {
            sql,
            params: self.params,
        }
    }

    fn table(&self) -> String {
        format!("\"{}\"", self.table)
    }

    /// Qualified reference for a field on the base table or a joined alias
    fn column(&self, field: &str) -> PortResult<String> {
        if field.contains('.') {
            quote_path(field)
        } else {
            Ok(format!("{}.{}", self.table(), quote_ident(field)?))
        }
    }

    fn nested(&self, join: &QueryJoin) -> PortResult<String> {
        let name = quote_ident(join.name())?;
        let to = quote_ident(column_name(&join.on.to_field))?;
        Ok(format!(
            "CASE WHEN {name}.{to} IS NULL THEN NULL ELSE to_jsonb({name}.*) END"
        ))
    }

    fn from(&self, joins: &[QueryJoin]) -> PortResult<String> {
        let mut sql = format!("FROM {}", self.table());
        for join in joins {
            let keyword = match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
                JoinType::Right => "RIGHT JOIN",
                JoinType::Full => "FULL JOIN",
            };
            let name = quote_ident(join.name())?;
            sql.push_str(&format!(
                " {} {} AS {} ON {} = {}.{}",
                keyword,
                quote_ident(&join.table)?,
                name,
                self.column(&join.on.from_field)?,
                name,
                quote_ident(column_name(&join.on.to_field))?,
            ));
        }
        Ok(sql)
    }

    fn projection(&self, options: &QueryOptions) -> PortResult<String> {
        if !options.group_by.is_empty() {
            let mut parts = options
                .group_by
                .iter()
                .map(|g| {
                    Ok(format!(
                        "{} AS {}",
                        self.column(g)?,
                        quote_ident(column_name(g))?
                    ))
                })
                .collect::<PortResult<Vec<_>>>()?;
            parts.push("count(*) AS \"count\"".to_string());
            return Ok(parts.join(", "));
        }

        let columns = parse_select(options.select.as_deref());
        if columns.is_empty() {
            let mut parts = vec![format!("{}.*", self.table())];
            for join in &options.joins {
                parts.push(format!(
                    "{} AS {}",
                    self.nested(join)?,
                    quote_ident(join.name())?
                ));
            }
            return Ok(parts.join(", "));
        }

        columns
            .iter()
            .map(|column| match options.joins.iter().find(|j| j.name() == *column) {
                Some(join) => Ok(format!("{} AS {}", self.nested(join)?, quote_ident(column)?)),
                None => Ok(format!(
                    "{} AS {}",
                    self.column(column)?,
                    quote_ident(column_name(column))?
                )),
            })
            .collect::<PortResult<Vec<_>>>()
            .map(|parts| parts.join(", "))
    }

    fn condition(&mut self, filter: &QueryFilter, grouped: bool) -> PortResult<String> {
        let col = if grouped && filter.field == "count" {
            "count(*)".to_string()
        } else {
            self.column(&filter.field)?
        };
        let value = &filter.value;

        let sql = match filter.operator {
            FilterOperator::Eq => format!("{} = {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Neq => format!("{} <> {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Gt => format!("{} > {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Gte => format!("{} >= {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Lt => format!("{} < {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Lte => format!("{} <= {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Like => format!("{} LIKE {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::Ilike => format!("{} ILIKE {}", col, self.bind(scalar_param(value)?)),
            FilterOperator::In => match value {
                FilterValue::List(items) if items.is_empty() => "FALSE".to_string(),
                FilterValue::List(items) => {
                    format!("{} = ANY({})", col, self.bind(array_param(items)?))
                }
                _ => return Err(DatabaseError::validation("`in` expects a list")),
            },
            FilterOperator::Is => match value {
                FilterValue::Null => format!("{} IS NULL", col),
                FilterValue::Bool(true) => format!("{} IS TRUE", col),
                FilterValue::Bool(false) => format!("{} IS FALSE", col),
                _ => return Err(DatabaseError::validation("`is` expects null, true or false")),
            },
            FilterOperator::Contains => match value {
                FilterValue::List(items) => {
                    format!("{} @> {}", col, self.bind(array_param(items)?))
                }
                FilterValue::Json(doc) => {
                    format!("{} @> {}::jsonb", col, self.bind(SqlParam::Json(doc.clone())))
                }
                _ => {
                    return Err(DatabaseError::validation(
                        "`contains` expects a list or JSON document",
                    ))
                }
            },
            FilterOperator::Overlaps => match value {
                FilterValue::List(items) => {
                    format!("{} && {}", col, self.bind(array_param(items)?))
                }
                _ => return Err(DatabaseError::validation("`overlaps` expects a list")),
            },
            FilterOperator::Match => format!(
                "to_tsvector({}::text) @@ plainto_tsquery({})",
                col,
                self.bind(scalar_param(value)?)
            ),
            FilterOperator::StartsWith | FilterOperator::EndsWith => {
                let text = value
                    .as_str()
                    .ok_or_else(|| DatabaseError::validation("pattern operators expect a string"))?;
                let pattern = if filter.operator == FilterOperator::StartsWith {
                    format!("{}%", escape_like(text))
                } else {
                    format!("%{}", escape_like(text))
                };
                format!("{} LIKE {}", col, self.bind(SqlParam::Text(pattern)))
            }
        };
        Ok(sql)
    }

    fn conditions(&mut self, filters: &[QueryFilter], grouped: bool) -> PortResult<Vec<String>> {
        filters
            .iter()
            .map(|f| self.condition(f, grouped))
            .collect()
    }

    fn order_by(&self, sorts: &[QuerySort], grouped: bool) -> PortResult<String> {
        let keys = sorts
            .iter()
            .map(|s| {
                let col = if grouped && s.field == "count" {
                    "\"count\"".to_string()
                } else {
                    self.column(&s.field)?
                };
                let direction = match s.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                let nulls = if s.nulls_come_first() {
                    "NULLS FIRST"
                } else {
                    "NULLS LAST"
                };
                Ok(format!("{} {} {}", col, direction, nulls))
            })
            .collect::<PortResult<Vec<_>>>()?;
        Ok(keys.join(", "))
    }

    /// Everything after the projection for a full select
    fn tail(&mut self, options: &QueryOptions, extra: Option<String>) -> PortResult<String> {
        let grouped = !options.group_by.is_empty();
        let mut sql = self.from(&options.joins)?;

        let mut conditions = self.conditions(&options.filters, false)?;
        conditions.extend(extra);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if grouped {
            let columns = options
                .group_by
                .iter()
                .map(|g| self.column(g))
                .collect::<PortResult<Vec<_>>>()?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&columns.join(", "));

            let having = self.conditions(options.effective_having(), true)?;
            if !having.is_empty() {
                sql.push_str(" HAVING ");
                sql.push_str(&having.join(" AND "));
            }
        }

        if !options.sort.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by(&options.sort, grouped)?);
        }

        if let Some(window) = options.pagination {
            let (offset, limit) = window.offset_limit();
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        }
        Ok(sql)
    }
}

/// `SELECT` for [`ReadPort::get_advanced`](crate::port::ReadPort::get_advanced)
///
/// # Example
///
/// ```rust
/// use qms_dataport::backend::sql;
/// use qms_dataport::query::{QueryFilter, QueryOptions, QuerySort};
///
/// let query = sql::select(
///     "categories",
///     &QueryOptions::new()
///         .filter(QueryFilter::eq("status", "active"))
///         .sort(QuerySort::desc("created_at"))
///         .paginate(2, 10),
/// )
/// .unwrap();
/// assert_eq!(
///     query.sql,
///     r#"SELECT "categories".* FROM "categories" WHERE "categories"."status" = $1 ORDER BY "categories"."created_at" DESC NULLS FIRST LIMIT 10 OFFSET 10"#
/// );
/// ```
pub fn select(table: &str, options: &QueryOptions) -> PortResult<SqlQuery> {
    options.validate()?;
    let mut builder = Builder::new(table)?;
    let projection = builder.projection(options)?;
    let tail = builder.tail(options, None)?;
    Ok(builder.finish(format!("SELECT {} {}", projection, tail)))
}

/// `SELECT` for [`ReadPort::search`](crate::port::ReadPort::search)
pub fn search(
    table: &str,
    query: &str,
    columns: &[&str],
    options: &QueryOptions,
) -> PortResult<SqlQuery> {
    options.validate()?;
    if columns.is_empty() {
        return Err(DatabaseError::validation("search needs at least one column"));
    }
    let mut builder = Builder::new(table)?;
    let projection = builder.projection(options)?;
    let targets = columns
        .iter()
        .map(|c| builder.column(c))
        .collect::<PortResult<Vec<_>>>()?;
    let placeholder = builder.bind(SqlParam::Text(format!("%{}%", escape_like(query))));
    let matcher = targets
        .iter()
        .map(|c| format!("{}::text ILIKE {}", c, placeholder))
        .collect::<Vec<_>>()
        .join(" OR ");
    let tail = builder.tail(options, Some(format!("({})", matcher)))?;
    Ok(builder.finish(format!("SELECT {} {}", projection, tail)))
}

/// `SELECT` for [`ReadPort::get_by_id`](crate::port::ReadPort::get_by_id)
pub fn select_by_id(table: &str, id: &RowId, options: &ByIdOptions) -> PortResult<SqlQuery> {
    let options = options.to_query_options();
    options.validate()?;
    let mut builder = Builder::new(table)?;
    let projection = builder.projection(&options)?;
    let column = builder.column("id")?;
    let placeholder = builder.bind(id_param(id));
    let tail = builder.tail(&options, Some(format!("{} = {}", column, placeholder)))?;
    Ok(builder.finish(format!("SELECT {} {} LIMIT 1", projection, tail)))
}

/// `SELECT count(*)` for [`ReadPort::count`](crate::port::ReadPort::count)
///
/// Grouped options count their groups through a subquery.
pub fn count(table: &str, options: &CountOptions) -> PortResult<SqlQuery> {
    let (tail, grouped) = counted(table, options)?;
    let sql = if grouped {
        format!("SELECT count(*) FROM (SELECT 1 {}) AS \"groups\"", tail.sql)
    } else {
        format!("SELECT count(*) {}", tail.sql)
    };
    Ok(SqlQuery { sql, ..tail })
}

/// Statement whose rows the planner would estimate for `options`
pub fn count_estimate(table: &str, options: &CountOptions) -> PortResult<SqlQuery> {
    let (tail, _) = counted(table, options)?;
    let sql = format!("SELECT 1 {}", tail.sql);
    Ok(explain(SqlQuery { sql, ..tail }))
}

/// `FROM` onwards for the rows or groups a count covers
fn counted(table: &str, options: &CountOptions) -> PortResult<(SqlQuery, bool)> {
    let options = options.to_query_options();
    options.validate()?;
    let mut builder = Builder::new(table)?;
    let tail = builder.tail(&options, None)?;
    Ok((builder.finish(tail), !options.group_by.is_empty()))
}

/// Wrap a statement so each row comes back as one `jsonb` object
pub fn rows_as_json(query: SqlQuery) -> SqlQuery {
    SqlQuery {
        sql: format!("SELECT to_jsonb(q) FROM ({}) AS q", query.sql),
        params: query.params,
    }
}

/// Wrap a statement in `EXPLAIN (FORMAT JSON)`
pub fn explain(query: SqlQuery) -> SqlQuery {
    SqlQuery {
        sql: format!("EXPLAIN (FORMAT JSON) {}", query.sql),
        params: query.params,
    }
}

fn data_columns(data: &Row) -> PortResult<Vec<String>> {
    data.keys().map(|k| quote_ident(k)).collect()
}

/// `INSERT` returning the stored row as `jsonb`
pub fn insert(table: &str, data: &Row) -> PortResult<SqlQuery> {
    let mut builder = Builder::new(table)?;
    let target = builder.table();
    if data.is_empty() {
        return Ok(builder.finish(format!(
            "INSERT INTO {target} DEFAULT VALUES RETURNING to_jsonb({target}.*)"
        )));
    }
    let columns = data_columns(data)?.join(", ");
    let placeholder = builder.bind(SqlParam::Json(Value::Object(data.clone())));
    Ok(builder.finish(format!(
        "INSERT INTO {target} ({columns}) SELECT {columns} FROM json_populate_record(NULL::{target}, {placeholder}::json) RETURNING to_jsonb({target}.*)"
    )))
}

/// `UPDATE` of one row by id, returning it as `jsonb`
///
/// With no columns to set this reads the row back unchanged, so a missing id
/// still yields no row.
pub fn update(table: &str, id: &RowId, data: &Row) -> PortResult<SqlQuery> {
    let mut builder = Builder::new(table)?;
    let target = builder.table();
    if data.is_empty() {
        let key = builder.bind(id_param(id));
        return Ok(builder.finish(format!(
            "SELECT to_jsonb({target}.*) FROM {target} WHERE {target}.\"id\" = {key}"
        )));
    }
    let columns = data_columns(data)?.join(", ");
    let record = builder.bind(SqlParam::Json(Value::Object(data.clone())));
    let key = builder.bind(id_param(id));
    Ok(builder.finish(format!(
        "UPDATE {target} SET ({columns}) = (SELECT {columns} FROM json_populate_record(NULL::{target}, {record}::json)) WHERE {target}.\"id\" = {key} RETURNING to_jsonb({target}.*)"
    )))
}

/// `DELETE` of one row by id, returning its id as `jsonb`
pub fn delete(table: &str, id: &RowId) -> PortResult<SqlQuery> {
    let mut builder = Builder::new(table)?;
    let target = builder.table();
    let key = builder.bind(id_param(id));
    Ok(builder.finish(format!(
        "DELETE FROM {target} WHERE {target}.\"id\" = {key} RETURNING to_jsonb({target}.\"id\")"
    )))
}

/// Named-argument function call aggregating its rows into a `jsonb` array
pub fn call(function: &str, params: &Row) -> PortResult<SqlQuery> {
    let name = quote_path(function)?;
    let mut builder = Builder {
        table: function,
        params: Vec::new(),
    };
    let args = params
        .iter()
        .map(|(key, value)| Ok(format!("{} => {}", quote_ident(key)?, builder.bind(json_param(value)))))
        .collect::<PortResult<Vec<_>>>()?
        .join(", ");
    Ok(builder.finish(format!(
        "SELECT COALESCE(jsonb_agg(to_jsonb(r)), '[]'::jsonb) FROM {name}({args}) AS r"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseErrorType;
    use crate::query::{CountMode, QueryJoin};
    use serde_json::json;

    #[test]
    fn test_invalid_identifiers_are_query_errors() {
        for bad in ["", "1abc", "na me", "x\"; DROP TABLE y; --", "a.b.c"] {
            let err = quote_path(bad).unwrap_err();
            assert_eq!(err.kind, DatabaseErrorType::QueryError, "{bad}");
        }
        let err = select("bad table", &QueryOptions::new()).unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::QueryError);
        let err = select(
            "queues",
            &QueryOptions::new().filter(QueryFilter::eq("status;--", "x")),
        )
        .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::QueryError);
    }

    #[test]
    fn test_plain_select() {
        let q = select("queues", &QueryOptions::new()).unwrap();
        assert_eq!(q.sql, r#"SELECT "queues".* FROM "queues""#);
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_projection_and_filters() {
        let options = QueryOptions::new()
            .select("id, name")
            .filter(QueryFilter::in_list("status", ["open", "paused"]))
            .filter(QueryFilter::is_null("closed_at"))
            .filter(QueryFilter::gte("position", 3));
        let q = select("queues", &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "queues"."id" AS "id", "queues"."name" AS "name" FROM "queues" WHERE "queues"."status" = ANY($1) AND "queues"."closed_at" IS NULL AND "queues"."position" >= $2"#
        );
        assert_eq!(
            q.params,
            vec![
                SqlParam::TextArray(vec!["open".into(), "paused".into()]),
                SqlParam::Int(3)
            ]
        );
    }

    #[test]
    fn test_every_operator_renders() {
        let filters = vec![
            QueryFilter::eq("a", 1),
            QueryFilter::neq("a", 1),
            QueryFilter::gt("a", 1),
            QueryFilter::gte("a", 1),
            QueryFilter::lt("a", 1),
            QueryFilter::lte("a", 1),
            QueryFilter::like("a", "x%"),
            QueryFilter::ilike("a", "x%"),
            QueryFilter::in_list("a", [1, 2]),
            QueryFilter::is_bool("a", true),
            QueryFilter::contains("a", vec!["x"]),
            QueryFilter::overlaps("a", vec!["x"]),
            QueryFilter::text_match("a", "x"),
            QueryFilter::starts_with("a", "50%"),
            QueryFilter::ends_with("a", "_x"),
        ];
        let expected = [
            r#""t"."a" = $1"#,
            r#""t"."a" <> $1"#,
            r#""t"."a" > $1"#,
            r#""t"."a" >= $1"#,
            r#""t"."a" < $1"#,
            r#""t"."a" <= $1"#,
            r#""t"."a" LIKE $1"#,
            r#""t"."a" ILIKE $1"#,
            r#""t"."a" = ANY($1)"#,
            r#""t"."a" IS TRUE"#,
            r#""t"."a" @> $1"#,
            r#""t"."a" && $1"#,
            r#"to_tsvector("t"."a"::text) @@ plainto_tsquery($1)"#,
            r#""t"."a" LIKE $1"#,
            r#""t"."a" LIKE $1"#,
        ];
        assert_eq!(filters.len(), FilterOperator::ALL.len());
        for (filter, sql) in filters.into_iter().zip(expected) {
            let q = select("t", &QueryOptions::new().filter(filter)).unwrap();
            assert_eq!(q.sql, format!(r#"SELECT "t".* FROM "t" WHERE {}"#, sql));
        }
    }

    #[test]
    fn test_prefix_suffix_escape_wildcards() {
        let q = select("t", &QueryOptions::new().filter(QueryFilter::starts_with("a", "50%_off"))).unwrap();
        assert_eq!(q.params, vec![SqlParam::Text("50\\%\\_off%".into())]);
        let q = select("t", &QueryOptions::new().filter(QueryFilter::ends_with("a", ".jpg"))).unwrap();
        assert_eq!(q.params, vec![SqlParam::Text("%.jpg".into())]);
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let q = select(
            "t",
            &QueryOptions::new().filter(QueryFilter::in_list("a", Vec::<i64>::new())),
        )
        .unwrap();
        assert_eq!(q.sql, r#"SELECT "t".* FROM "t" WHERE FALSE"#);
    }

    #[test]
    fn test_mixed_list_is_rejected() {
        let err = select(
            "t",
            &QueryOptions::new().filter(QueryFilter::in_list(
                "a",
                vec![FilterValue::from(1), FilterValue::from("x")],
            )),
        )
        .unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::QueryError);
    }

    #[test]
    fn test_json_containment() {
        let q = select(
            "t",
            &QueryOptions::new().filter(QueryFilter::contains(
                "meta",
                FilterValue::Json(json!({"tier": "gold"})),
            )),
        )
        .unwrap();
        assert_eq!(q.sql, r#"SELECT "t".* FROM "t" WHERE "t"."meta" @> $1::jsonb"#);
        assert_eq!(q.params, vec![SqlParam::Json(json!({"tier": "gold"}))]);
    }

    #[test]
    fn test_joins_nest_rows() {
        let options = QueryOptions::new()
            .join(QueryJoin::new("shops", "shop_id", "id").alias("shop").kind(JoinType::Left));
        let q = select("queues", &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "queues".*, CASE WHEN "shop"."id" IS NULL THEN NULL ELSE to_jsonb("shop".*) END AS "shop" FROM "queues" LEFT JOIN "shops" AS "shop" ON "queues"."shop_id" = "shop"."id""#
        );
    }

    #[test]
    fn test_selecting_join_alias() {
        let options = QueryOptions::new()
            .select("id, shop, shop.name")
            .join(QueryJoin::new("shops", "shop_id", "id").alias("shop"));
        let q = select("queues", &options).unwrap();
        assert!(q.sql.starts_with(
            r#"SELECT "queues"."id" AS "id", CASE WHEN "shop"."id" IS NULL THEN NULL ELSE to_jsonb("shop".*) END AS "shop", "shop"."name" AS "name" FROM"#
        ));
        assert!(q.sql.contains(r#"INNER JOIN "shops" AS "shop""#));
    }

    #[test]
    fn test_grouping_and_having() {
        let options = QueryOptions::new()
            .group_by("status")
            .having(QueryFilter::gt("count", 1))
            .sort(QuerySort::desc("count"));
        let q = select("queues", &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "queues"."status" AS "status", count(*) AS "count" FROM "queues" GROUP BY "queues"."status" HAVING count(*) > $1 ORDER BY "count" DESC NULLS FIRST"#
        );
    }

    #[test]
    fn test_having_dropped_without_group_by() {
        let q = select("queues", &QueryOptions::new().having(QueryFilter::gt("count", 1))).unwrap();
        assert_eq!(q.sql, r#"SELECT "queues".* FROM "queues""#);
    }

    #[test]
    fn test_explicit_null_placement_and_range() {
        let options = QueryOptions::new()
            .sort(QuerySort::asc("position").nulls_first(true))
            .sort(QuerySort::asc("id"))
            .range(30, 15);
        let q = select("queues", &options).unwrap();
        assert!(q.sql.ends_with(
            r#"ORDER BY "queues"."position" ASC NULLS FIRST, "queues"."id" ASC NULLS LAST LIMIT 15 OFFSET 30"#
        ));
    }

    #[test]
    fn test_validation_runs_first() {
        let err = select("queues", &QueryOptions::new().paginate(0, 10)).unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ValidationError);
    }

    #[test]
    fn test_search_binds_pattern_once() {
        let q = search(
            "customers",
            "ann_",
            &["name", "email"],
            &QueryOptions::new().filter(QueryFilter::eq("shop_id", 4)),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "customers".* FROM "customers" WHERE "customers"."shop_id" = $1 AND ("customers"."name"::text ILIKE $2 OR "customers"."email"::text ILIKE $2)"#
        );
        assert_eq!(
            q.params,
            vec![SqlParam::Int(4), SqlParam::Text("%ann\\_%".into())]
        );
    }

    #[test]
    fn test_by_id() {
        let q = select_by_id("categories", &RowId::from(7), &ByIdOptions::new().select("id, name"))
            .unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "categories"."id" AS "id", "categories"."name" AS "name" FROM "categories" WHERE "categories"."id" = $1 LIMIT 1"#
        );
        assert_eq!(q.params, vec![SqlParam::Int(7)]);
    }

    #[test]
    fn test_count_and_estimate() {
        let options = CountOptions::new()
            .filter(QueryFilter::eq("status", "open"))
            .mode(CountMode::Planned);
        let q = count("queues", &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT count(*) FROM "queues" WHERE "queues"."status" = $1"#
        );
        let e = count_estimate("queues", &options).unwrap();
        assert_eq!(
            e.sql,
            r#"EXPLAIN (FORMAT JSON) SELECT 1 FROM "queues" WHERE "queues"."status" = $1"#
        );
    }

    #[test]
    fn test_grouped_count_counts_groups() {
        let options = CountOptions::new()
            .filter(QueryFilter::eq("shop_id", 10))
            .group_by("status")
            .having(QueryFilter::gt("count", 1));
        let q = count("queues", &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT count(*) FROM (SELECT 1 FROM "queues" WHERE "queues"."shop_id" = $1 GROUP BY "queues"."status" HAVING count(*) > $2) AS "groups""#
        );
        assert_eq!(q.params, vec![SqlParam::Int(10), SqlParam::Int(1)]);

        let e = count_estimate("queues", &options).unwrap();
        assert_eq!(
            e.sql,
            r#"EXPLAIN (FORMAT JSON) SELECT 1 FROM "queues" WHERE "queues"."shop_id" = $1 GROUP BY "queues"."status" HAVING count(*) > $2"#
        );
    }

    #[test]
    fn test_rows_as_json() {
        let q = rows_as_json(select("t", &QueryOptions::new()).unwrap());
        assert_eq!(q.sql, r#"SELECT to_jsonb(q) FROM (SELECT "t".* FROM "t") AS q"#);
    }

    #[test]
    fn test_insert_selects_provided_columns() {
        let data = json!({"name": "Nails", "is_active": true});
        let q = insert("categories", data.as_object().unwrap()).unwrap();
        assert_eq!(
            q.sql,
            r#"INSERT INTO "categories" ("is_active", "name") SELECT "is_active", "name" FROM json_populate_record(NULL::"categories", $1::json) RETURNING to_jsonb("categories".*)"#
        );
        assert_eq!(q.params, vec![SqlParam::Json(data)]);

        let q = insert("categories", &Row::new()).unwrap();
        assert!(q.sql.contains("DEFAULT VALUES"));
    }

    #[test]
    fn test_update_and_delete() {
        let data = json!({"status": "closed"});
        let q = update("queues", &RowId::from("Q-1"), data.as_object().unwrap()).unwrap();
        assert_eq!(
            q.sql,
            r#"UPDATE "queues" SET ("status") = (SELECT "status" FROM json_populate_record(NULL::"queues", $1::json)) WHERE "queues"."id" = $2 RETURNING to_jsonb("queues".*)"#
        );
        assert_eq!(q.params[1], SqlParam::Text("Q-1".into()));

        let unchanged = update("queues", &RowId::from(1), &Row::new()).unwrap();
        assert_eq!(
            unchanged.sql,
            r#"SELECT to_jsonb("queues".*) FROM "queues" WHERE "queues"."id" = $1"#
        );
        assert_eq!(unchanged.params, vec![SqlParam::Int(1)]);

        let q = delete("queues", &RowId::from(1)).unwrap();
        assert_eq!(
            q.sql,
            r#"DELETE FROM "queues" WHERE "queues"."id" = $1 RETURNING to_jsonb("queues"."id")"#
        );
    }

    #[test]
    fn test_rpc_call() {
        let shop = Uuid::new_v4();
        let params = json!({"p_shop_id": shop.to_string(), "p_limit": 5});
        let q = call("get_queue_stats", params.as_object().unwrap()).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT COALESCE(jsonb_agg(to_jsonb(r)), '[]'::jsonb) FROM "get_queue_stats"("p_limit" => $1, "p_shop_id" => $2) AS r"#
        );
        assert_eq!(q.params, vec![SqlParam::Int(5), SqlParam::Uuid(shop)]);

        assert!(call("drop table", &Row::new()).is_err());
    }
}
