//! Sorts, joins, pagination windows and the [`QueryOptions`] aggregate

use serde::{Deserialize, Serialize};

use super::filter::QueryFilter;
use crate::error::{DatabaseError, ErrorContext};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order
    #[default]
    Asc,
    /// Descending order
    Desc,
}

/// One ordering key
///
/// When `nulls_first` is unset, nulls sort last for ascending and first for
/// descending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySort {
    /// Field to sort by
    pub field: String,
    /// Direction
    pub direction: SortDirection,
    /// Explicit null placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls_first: Option<bool>,
}

impl QuerySort {
    /// Ascending sort
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
            nulls_first: None,
        }
    }

    /// Descending sort
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
            nulls_first: None,
        }
    }

    /// Place nulls explicitly
    pub fn nulls_first(mut self, first: bool) -> Self {
        self.nulls_first = Some(first);
        self
    }

    /// Resolved null placement
    pub fn nulls_come_first(&self) -> bool {
        self.nulls_first
            .unwrap_or(self.direction == SortDirection::Desc)
    }
}

/// Join type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Only rows with a match on both sides
    #[default]
    Inner,
    /// Every left row, joined side null when absent
    Left,
    /// Every right row, left side empty when absent
    Right,
    /// Every row from both sides
    Full,
}

/// Join condition: `from_field` on the base side equals `to_field` on the joined table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOn {
    /// Field on the base table (or `alias.field` of an earlier join)
    pub from_field: String,
    /// Field on the joined table
    pub to_field: String,
}

/// A join against another table
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::{JoinType, QueryJoin};
///
/// let shop = QueryJoin::new("shops", "shop_id", "id")
///     .alias("shop")
///     .kind(JoinType::Left);
/// assert_eq!(shop.name(), "shop");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJoin {
    /// Table to join
    pub table: String,
    /// Name the joined row is exposed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Join type
    #[serde(default, rename = "type")]
    pub join_type: JoinType,
    /// Join condition
    pub on: JoinOn,
}

impl QueryJoin {
    /// Inner join on `from_field = to_field`
    pub fn new(
        table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            alias: None,
            join_type: JoinType::Inner,
            on: JoinOn {
                from_field: from_field.into(),
                to_field: to_field.into(),
            },
        }
    }

    /// Set the alias
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the join type
    pub fn kind(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Alias if set, otherwise the table name
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    fn validate(&self) -> Result<(), DatabaseError> {
        if self.table.is_empty() || self.on.from_field.is_empty() || self.on.to_field.is_empty() {
            return Err(DatabaseError::validation(
                "join requires a table and both join fields",
            )
            .with_context(ErrorContext::for_table(self.table.clone())));
        }
        Ok(())
    }
}

/// Pagination window
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::QueryPagination;
///
/// assert_eq!(QueryPagination::page(3, 20).offset_limit(), (40, 20));
/// assert_eq!(QueryPagination::range(5, 10).offset_limit(), (5, 10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryPagination {
    /// One-based page number and page size
    #[serde(rename_all = "camelCase")]
    Page {
        /// Page number, starting at 1
        page: u64,
        /// Items per page
        page_size: u64,
    },
    /// Raw offset and limit
    Offset {
        /// Rows to skip
        offset: u64,
        /// Maximum rows to return
        limit: u64,
    },
}

impl QueryPagination {
    /// Page-based window
    pub fn page(page: u64, page_size: u64) -> Self {
        Self::Page { page, page_size }
    }

    /// Offset-based window
    pub fn range(offset: u64, limit: u64) -> Self {
        Self::Offset { offset, limit }
    }

    /// Window expressed as `(offset, limit)`
    pub fn offset_limit(&self) -> (u64, u64) {
        match *self {
            Self::Page { page, page_size } => {
                (page.saturating_sub(1).saturating_mul(page_size), page_size)
            }
            Self::Offset { offset, limit } => (offset, limit),
        }
    }

    /// Reject page numbers below 1 and empty windows
    pub fn validate(&self) -> Result<(), DatabaseError> {
        match *self {
            Self::Page { page, .. } if page < 1 => Err(DatabaseError::validation(format!(
                "page must be at least 1, got {}",
                page
            ))
            .with_context(ErrorContext::new().field("page"))),
            Self::Page { page_size: 0, .. } => {
                Err(DatabaseError::validation("page size must be at least 1")
                    .with_context(ErrorContext::new().field("page_size")))
            }
            Self::Offset { limit: 0, .. } => {
                Err(DatabaseError::validation("limit must be at least 1")
                    .with_context(ErrorContext::new().field("limit")))
            }
            _ => Ok(()),
        }
    }
}

/// Row-count strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountMode {
    /// Authoritative row count
    #[default]
    Exact,
    /// Planner estimate
    Planned,
    /// Planner estimate, exact for small results
    Estimated,
}

/// Declarative query bundle passed to [`ReadPort`](crate::port::ReadPort) methods
///
/// # Example
///
/// ```rust
/// use qms_dataport::query::{QueryFilter, QueryOptions, QuerySort};
///
/// let options = QueryOptions::new()
///     .filter(QueryFilter::eq("status", "active"))
///     .sort(QuerySort::desc("created_at"))
///     .paginate(1, 20);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Comma-separated column list, `*` when unset
    pub select: Option<String>,
    /// Conditions, all of which must hold
    pub filters: Vec<QueryFilter>,
    /// Ordering keys, primary first
    pub sort: Vec<QuerySort>,
    /// Window; no limiting when unset
    pub pagination: Option<QueryPagination>,
    /// Joined tables
    pub joins: Vec<QueryJoin>,
    /// Grouping columns
    pub group_by: Vec<String>,
    /// Conditions on grouped rows
    pub having: Vec<QueryFilter>,
    /// Count strategy for paginated reads
    pub count: Option<CountMode>,
}

impl QueryOptions {
    /// Empty options: every row, no ordering
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    /// Add a filter
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an ordering key
    pub fn sort(mut self, sort: QuerySort) -> Self {
        self.sort.push(sort);
        self
    }

    /// Page-based window
    pub fn paginate(mut self, page: u64, page_size: u64) -> Self {
        self.pagination = Some(QueryPagination::page(page, page_size));
        self
    }

    /// Offset-based window
    pub fn range(mut self, offset: u64, limit: u64) -> Self {
        self.pagination = Some(QueryPagination::range(offset, limit));
        self
    }

    /// Add a join
    pub fn join(mut self, join: QueryJoin) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a grouping column
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add a condition on grouped rows
    pub fn having(mut self, filter: QueryFilter) -> Self {
        self.having.push(filter);
        self
    }

    /// Set the count strategy
    pub fn count(mut self, mode: CountMode) -> Self {
        self.count = Some(mode);
        self
    }

    /// Projected columns; empty means all
    pub fn columns(&self) -> Vec<&str> {
        parse_select(self.select.as_deref())
    }

    /// `having` conditions that apply; empty unless grouped
    pub fn effective_having(&self) -> &[QueryFilter] {
        if self.group_by.is_empty() {
            &[]
        } else {
            &self.having
        }
    }

    /// Every filter a backend will evaluate
    pub fn all_filters(&self) -> impl Iterator<Item = &QueryFilter> {
        self.filters.iter().chain(self.effective_having())
    }

    /// Check every filter, the window and the joins
    pub fn validate(&self) -> Result<(), DatabaseError> {
        for filter in self.all_filters() {
            filter.validate()?;
        }
        if let Some(ref pagination) = self.pagination {
            pagination.validate()?;
        }
        for join in &self.joins {
            join.validate()?;
        }
        if self.sort.iter().any(|s| s.field.trim().is_empty()) {
            return Err(DatabaseError::validation("sort field must not be empty"));
        }
        Ok(())
    }
}

/// Options for [`ReadPort::get_by_id`](crate::port::ReadPort::get_by_id)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ByIdOptions {
    /// Comma-separated column list, `*` when unset
    pub select: Option<String>,
    /// Joined tables
    pub joins: Vec<QueryJoin>,
}

impl ByIdOptions {
    /// All columns, no joins
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    /// Add a join
    pub fn join(mut self, join: QueryJoin) -> Self {
        self.joins.push(join);
        self
    }

    /// Equivalent query options
    pub fn to_query_options(&self) -> QueryOptions {
        QueryOptions {
            select: self.select.clone(),
            joins: self.joins.clone(),
            ..QueryOptions::default()
        }
    }
}

/// Options for [`ReadPort::count`](crate::port::ReadPort::count)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    /// Conditions, all of which must hold
    pub filters: Vec<QueryFilter>,
    /// Joined tables
    pub joins: Vec<QueryJoin>,
    /// Grouping columns; when set, groups are counted instead of rows
    pub group_by: Vec<String>,
    /// Conditions on grouped rows
    pub having: Vec<QueryFilter>,
    /// Count strategy
    pub mode: CountMode,
}

impl CountOptions {
    /// Exact count of every row
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a join
    pub fn join(mut self, join: QueryJoin) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a grouping column
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add a condition on grouped rows
    pub fn having(mut self, filter: QueryFilter) -> Self {
        self.having.push(filter);
        self
    }

    /// Set the count strategy
    pub fn mode(mut self, mode: CountMode) -> Self {
        self.mode = mode;
        self
    }

    /// Count matching the rows `options` would return, ignoring its window
    pub fn matching(options: &QueryOptions, default_mode: CountMode) -> Self {
        Self {
            filters: options.filters.clone(),
            joins: options.joins.clone(),
            group_by: options.group_by.clone(),
            having: options.having.clone(),
            mode: options.count.unwrap_or(default_mode),
        }
    }

    /// Equivalent query options
    pub fn to_query_options(&self) -> QueryOptions {
        QueryOptions {
            filters: self.filters.clone(),
            joins: self.joins.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            ..QueryOptions::default()
        }
    }
}

/// Split a select string into column names; `*` or blank yields none
pub fn parse_select(select: Option<&str>) -> Vec<&str> {
    match select.map(str::trim) {
        None | Some("") | Some("*") => Vec::new(),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseErrorType;
    use crate::query::FilterValue;

    #[test]
    fn test_page_offsets() {
        assert_eq!(QueryPagination::page(1, 20).offset_limit(), (0, 20));
        assert_eq!(QueryPagination::page(3, 20).offset_limit(), (40, 20));
    }

    #[test]
    fn test_page_zero_is_rejected() {
        let err = QueryPagination::page(0, 20).validate().unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ValidationError);
        assert!(QueryPagination::page(1, 0).validate().is_err());
        assert!(QueryPagination::range(0, 0).validate().is_err());
        assert!(QueryPagination::range(0, 1).validate().is_ok());
    }

    #[test]
    fn test_pagination_deserializes_both_shapes() {
        let page: QueryPagination = serde_json::from_str(r#"{"page":2,"pageSize":10}"#).unwrap();
        assert_eq!(page, QueryPagination::page(2, 10));
        let range: QueryPagination = serde_json::from_str(r#"{"offset":5,"limit":5}"#).unwrap();
        assert_eq!(range, QueryPagination::range(5, 5));
    }

    #[test]
    fn test_default_null_placement() {
        assert!(!QuerySort::asc("a").nulls_come_first());
        assert!(QuerySort::desc("a").nulls_come_first());
        assert!(!QuerySort::desc("a").nulls_first(false).nulls_come_first());
    }

    #[test]
    fn test_having_ignored_without_group_by() {
        let options = QueryOptions::new().having(QueryFilter::gt("count", 1));
        assert!(options.effective_having().is_empty());
        let grouped = options.group_by("status");
        assert_eq!(grouped.effective_having().len(), 1);
    }

    #[test]
    fn test_ignored_having_is_not_validated() {
        let options = QueryOptions::new().having(QueryFilter::eq("count", FilterValue::Null));
        assert!(options.validate().is_ok());
        assert!(options.group_by("status").validate().is_err());
    }

    #[test]
    fn test_validate_catches_bad_filter() {
        let options = QueryOptions::new().filter(in_with_scalar());
        let err = options.validate().unwrap_err();
        assert_eq!(err.kind, DatabaseErrorType::ValidationError);
    }

    #[test]
    fn test_parse_select() {
        assert!(parse_select(None).is_empty());
        assert!(parse_select(Some(" * ")).is_empty());
        assert_eq!(parse_select(Some("id, name ,shop")), vec!["id", "name", "shop"]);
    }

    #[test]
    fn test_join_defaults_to_inner() {
        let join: QueryJoin = serde_json::from_str(
            r#"{"table":"shops","on":{"from_field":"shop_id","to_field":"id"}}"#,
        )
        .unwrap();
        assert_eq!(join.join_type, JoinType::Inner);
        assert_eq!(join.name(), "shops");
    }

    #[test]
    fn test_count_options_follow_query() {
        let options = QueryOptions::new()
            .filter(QueryFilter::eq("status", "open"))
            .paginate(2, 5);
        let count = CountOptions::matching(&options, CountMode::Planned);
        assert_eq!(count.filters, options.filters);
        assert_eq!(count.mode, CountMode::Planned);
        let exact = CountOptions::matching(&options.count(CountMode::Exact), CountMode::Planned);
        assert_eq!(exact.mode, CountMode::Exact);
    }

    #[test]
    fn test_count_options_keep_grouping() {
        let options = QueryOptions::new()
            .group_by("status")
            .having(QueryFilter::gt("count", 1));
        let count = CountOptions::matching(&options, CountMode::Exact);
        assert_eq!(count.group_by, vec!["status".to_string()]);
        assert_eq!(count.having.len(), 1);
        assert_eq!(count.to_query_options().effective_having().len(), 1);
    }

    fn in_with_scalar() -> QueryFilter {
        QueryFilter {
            field: "status".into(),
            operator: crate::query::FilterOperator::In,
            value: FilterValue::from("open"),
        }
    }
}
