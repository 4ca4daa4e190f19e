//! Service categories

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{decode, encode};
use crate::config::QueryConfig;
use crate::ids::RowId;
use crate::pagination::PaginatedResult;
use crate::port::{DataPort, Row};
use crate::query::{ByIdOptions, QueryFilter, QueryOptions, QuerySort};
use crate::repository::{CategoryError, MapFailure, RepositoryBase, RepositoryError};

const TABLE: &str = "categories";
const ENTITY: &str = "Category";
const SEARCH_COLUMNS: [&str; 2] = ["name", "description"];

/// A category of services offered by shops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn active_by_default() -> bool {
    true
}

/// Fields for a new category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
}

impl NewCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_active: true,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Category persistence
pub struct CategoryRepository<P> {
    base: RepositoryBase<P>,
}

impl<P: DataPort> CategoryRepository<P> {
    /// Categories are readable and writable at any privilege level
    pub fn new(port: Arc<P>) -> Self {
        Self {
            base: RepositoryBase::new(port, ENTITY),
        }
    }

    pub fn with_query_config(mut self, query: QueryConfig) -> Self {
        self.base = self.base.with_query_config(query);
        self
    }

    /// One page of categories ordered by name
    pub async fn list(
        &self,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> Result<PaginatedResult<Category>, CategoryError> {
        const OP: &str = "list_categories";
        let options = QueryOptions::new()
            .sort(QuerySort::asc("name"))
            .sort(QuerySort::asc("id"));
        let page = self
            .base
            .paginate(TABLE, options, page, page_size)
            .await
            .map_domain::<CategoryError>(OP)?;
        page.try_map(|row| decode(row, ENTITY, OP)).map_domain(OP)
    }

    /// The category with `id`, if any
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Category>, CategoryError> {
        const OP: &str = "find_category";
        self.base
            .run(async {
                let row = self
                    .base
                    .port()
                    .get_by_id(TABLE, &RowId::from(id), &ByIdOptions::new())
                    .await
                    .map_domain::<CategoryError>(OP)?;
                row.map(|row| decode(row, ENTITY, OP))
                    .transpose()
                    .map_domain(OP)
            })
            .await
    }

    /// Active categories ordered by name
    pub async fn find_active(&self) -> Result<Vec<Category>, CategoryError> {
        const OP: &str = "find_active_categories";
        let options = QueryOptions::new()
            .filter(QueryFilter::eq("is_active", true))
            .sort(QuerySort::asc("name"));
        self.base
            .run(async {
                let rows = self
                    .base
                    .port()
                    .get_advanced(TABLE, &options)
                    .await
                    .map_domain::<CategoryError>(OP)?;
                decode_all(rows, OP)
            })
            .await
    }

    /// Categories whose name or description contains `query`
    pub async fn search(&self, query: &str) -> Result<Vec<Category>, CategoryError> {
        const OP: &str = "search_categories";
        let options = QueryOptions::new().sort(QuerySort::asc("name"));
        self.base
            .run(async {
                let rows = self
                    .base
                    .port()
                    .search(TABLE, query, &SEARCH_COLUMNS, &options)
                    .await
                    .map_domain::<CategoryError>(OP)?;
                decode_all(rows, OP)
            })
            .await
    }

    /// Create a category; names are unique
    pub async fn create(&self, category: NewCategory) -> Result<Category, CategoryError> {
        const OP: &str = "create_category";
        self.base
            .run(async {
                let mut by_name = Row::new();
                by_name.insert("name".into(), category.name.clone().into());
                let existing = self
                    .base
                    .port()
                    .get(TABLE, &by_name)
                    .await
                    .map_domain::<CategoryError>(OP)?;
                if !existing.is_empty() {
                    return Err(RepositoryError::already_exists(ENTITY, category.name.as_str())
                        .with_operation(OP))
                    .map_domain(OP);
                }

                let data = encode(&category, ENTITY, OP).map_domain::<CategoryError>(OP)?;
                let row = self
                    .base
                    .port()
                    .insert(TABLE, data)
                    .await
                    .map_domain::<CategoryError>(OP)?;
                tracing::info!(name = %category.name, "category created");
                decode(row, ENTITY, OP).map_domain(OP)
            })
            .await
    }

    /// Apply `changes` to the category with `id`
    pub async fn update(&self, id: i64, changes: CategoryUpdate) -> Result<Category, CategoryError> {
        const OP: &str = "update_category";
        self.base
            .run(async {
                let data = encode(&changes, ENTITY, OP).map_domain::<CategoryError>(OP)?;
                let row = self
                    .base
                    .port()
                    .update(TABLE, &RowId::from(id), data)
                    .await
                    .map_domain::<CategoryError>(OP)?;
                decode(row, ENTITY, OP).map_domain(OP)
            })
            .await
    }

    /// Delete the category with `id`
    pub async fn delete(&self, id: i64) -> Result<(), CategoryError> {
        const OP: &str = "delete_category";
        self.base
            .run(async {
                self.base
                    .port()
                    .delete(TABLE, &RowId::from(id))
                    .await
                    .map_domain(OP)
            })
            .await
    }
}

fn decode_all(rows: Vec<Row>, operation: &str) -> Result<Vec<Category>, CategoryError> {
    rows.into_iter()
        .map(|row| decode(row, ENTITY, operation))
        .collect::<Result<Vec<_>, _>>()
        .map_domain(operation)
}
