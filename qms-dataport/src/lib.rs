//! # qms-dataport
//!
//! Backend-agnostic query and persistence layer for the queue management admin
//! backend, with a uniform error taxonomy and one pagination algorithm.
//!
//! ## Features
//!
//! - **Query model**: filters (15 operators), multi-key sorts, joins, grouping,
//!   page or offset windows, count modes
//! - **Data port**: read, write and advanced (RPC + raw client) capability traits
//! - **Backends**: in-memory reference store (`memory`), PostgreSQL via sqlx (`database`)
//! - **Errors**: storage-level [`DatabaseError`](error::DatabaseError) mapped into one
//!   narrow domain error per bounded context
//! - **Privilege scoping**: admin-only repositories refuse standard ports at construction
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use qms_dataport::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::builder()
//!     .table("categories", vec![
//!         json!({"id": 1, "name": "Haircut", "is_active": true}),
//!         json!({"id": 2, "name": "Coloring", "is_active": false}),
//!     ])
//!     .build();
//!
//! let rows = store
//!     .get_advanced("categories", &QueryOptions::new().filter(QueryFilter::eq("is_active", true)))
//!     .await
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//!
//! // Queue administration needs an elevated port
//! let err = QueueRepository::new(Arc::new(store)).err().unwrap();
//! assert_eq!(err.kind, QueueErrorType::Unauthorized);
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod domains;
pub mod error;
pub mod ids;
pub mod observability;
pub mod pagination;
pub mod port;
pub mod query;
pub mod repository;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, QueryConfig};
    pub use crate::error::{
        DatabaseError, DatabaseErrorType, Error, ErrorContext, Result,
    };
    pub use crate::ids::RowId;
    pub use crate::observability::init_tracing;
    pub use crate::pagination::{compute_meta, PaginatedResult, PaginationMeta};
    pub use crate::port::{
        AccessLevel, AdvancedPort, DataPort, Port, PortResult, ReadPort, Row, WritePort,
    };
    pub use crate::query::{
        ByIdOptions, CountMode, CountOptions, FilterOperator, FilterValue, JoinType,
        QueryFilter, QueryJoin, QueryOptions, QueryPagination, QuerySort, SortDirection,
    };
    pub use crate::repository::{
        DomainError, Failure, MapFailure, RepositoryBase, RepositoryError,
    };

    pub use crate::domains::{CategoryRepository, QueueRepository};
    pub use crate::repository::{
        CategoryError, CategoryErrorType, DashboardError, DashboardErrorType, QueueError,
        QueueErrorType,
    };

    #[cfg(feature = "memory")]
    pub use crate::backend::MemoryStore;

    #[cfg(feature = "database")]
    pub use crate::backend::PgDataPort;
}
