//! Declarative query model
//!
//! Value types describing filters, sorts, joins, pagination windows and
//! selected columns. They carry no behavior beyond validation; every backend
//! adapter interprets them.
//!
//! # Example
//!
//! ```rust
//! use qms_dataport::query::{JoinType, QueryFilter, QueryJoin, QueryOptions, QuerySort};
//!
//! let options = QueryOptions::new()
//!     .select("id, name, shop")
//!     .filter(QueryFilter::in_list("status", ["open", "paused"]))
//!     .join(QueryJoin::new("shops", "shop_id", "id").alias("shop").kind(JoinType::Left))
//!     .sort(QuerySort::desc("created_at"))
//!     .paginate(2, 25);
//! ```

mod filter;
mod options;

pub use filter::{FilterOperator, FilterValue, QueryFilter};
pub use options::{
    parse_select, ByIdOptions, CountMode, CountOptions, JoinOn, JoinType, QueryJoin,
    QueryOptions, QueryPagination, QuerySort, SortDirection,
};
