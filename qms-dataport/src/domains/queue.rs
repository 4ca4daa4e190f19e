//! Shop queues
//!
//! Queue administration runs against the service-role port only; building a
//! [`QueueRepository`] over a standard port fails before any call is made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::{decode, encode};
use crate::config::QueryConfig;
use crate::ids::RowId;
use crate::pagination::PaginatedResult;
use crate::port::{AccessLevel, DataPort, Row};
use crate::query::{ByIdOptions, QueryFilter, QueryOptions, QuerySort};
use crate::repository::{MapFailure, QueueError, RepositoryBase, RepositoryError};

const TABLE: &str = "queues";
const ENTITY: &str = "Queue";
const STATS_RPC: &str = "get_queue_stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Open,
    Paused,
    Closed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: i64,
    pub shop_id: i64,
    pub name: String,
    pub status: QueueStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Aggregates reported by the `get_queue_stats` procedure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub waiting: u64,
    pub serving: u64,
    pub served_today: u64,
    pub average_wait_minutes: f64,
}

impl QueueStats {
    /// Stats for a shop with no queue activity
    pub const EMPTY: QueueStats = QueueStats {
        waiting: 0,
        serving: 0,
        served_today: 0,
        average_wait_minutes: 0.0,
    };
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Admin-only queue persistence
pub struct QueueRepository<P> {
    base: RepositoryBase<P>,
}

impl<P: DataPort> QueueRepository<P> {
    /// Fails with `UNAUTHORIZED` unless `port` is elevated
    pub fn new(port: Arc<P>) -> Result<Self, QueueError> {
        let base = RepositoryBase::require(port, ENTITY, AccessLevel::Elevated)
            .map_domain::<QueueError>("create_queue_repository")?;
        Ok(Self { base })
    }

    pub fn with_query_config(mut self, query: QueryConfig) -> Self {
        self.base = self.base.with_query_config(query);
        self
    }

    /// One page of a shop's queues, optionally narrowed to one status
    pub async fn list_by_shop(
        &self,
        shop_id: i64,
        status: Option<QueueStatus>,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> Result<PaginatedResult<Queue>, QueueError> {
        const OP: &str = "list_queues_by_shop";
        let mut options = QueryOptions::new()
            .filter(QueryFilter::eq("shop_id", shop_id))
            .sort(QuerySort::asc("id"));
        if let Some(status) = status {
            options = options.filter(QueryFilter::eq("status", status.as_str()));
        }
        let page = self
            .base
            .paginate(TABLE, options, page, page_size)
            .await
            .map_domain::<QueueError>(OP)?;
        page.try_map(|row| decode(row, ENTITY, OP)).map_domain(OP)
    }

    /// The queue with `id`, if any
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Queue>, QueueError> {
        const OP: &str = "find_queue";
        self.base
            .run(async {
                let row = self
                    .base
                    .port()
                    .get_by_id(TABLE, &RowId::from(id), &ByIdOptions::new())
                    .await
                    .map_domain::<QueueError>(OP)?;
                row.map(|row| decode(row, ENTITY, OP))
                    .transpose()
                    .map_domain(OP)
            })
            .await
    }

    /// Live statistics for a shop; [`QueueStats::EMPTY`] when the procedure
    /// reports nothing
    pub async fn stats(&self, shop_id: i64) -> Result<QueueStats, QueueError> {
        const OP: &str = "get_queue_stats";
        self.base
            .run(async {
                let mut params = Row::new();
                params.insert("p_shop_id".into(), shop_id.into());
                let result = self
                    .base
                    .port()
                    .call_rpc(STATS_RPC, params)
                    .await
                    .map_domain::<QueueError>(OP)?;

                let row = match result {
                    Value::Array(rows) => rows.into_iter().next(),
                    Value::Null => None,
                    other => Some(other),
                };
                match row {
                    Some(Value::Object(row)) => decode(row, "QueueStats", OP).map_domain(OP),
                    Some(Value::Null) | None => Ok(QueueStats::EMPTY),
                    Some(other) => Err(RepositoryError::operation_failed(
                        OP,
                        format!("{} returned a non-object row: {}", STATS_RPC, other),
                    ))
                    .map_domain(OP),
                }
            })
            .await
    }

    /// Set the status of the queue with `id`
    pub async fn update_status(&self, id: i64, status: QueueStatus) -> Result<Queue, QueueError> {
        const OP: &str = "update_queue_status";
        self.base
            .run(async {
                #[derive(Serialize)]
                struct StatusChange {
                    status: QueueStatus,
                }

                let data =
                    encode(&StatusChange { status }, ENTITY, OP).map_domain::<QueueError>(OP)?;
                let row = self
                    .base
                    .port()
                    .update(TABLE, &RowId::from(id), data)
                    .await
                    .map_domain::<QueueError>(OP)?;
                tracing::info!(queue_id = id, %status, "queue status changed");
                decode(row, ENTITY, OP).map_domain(OP)
            })
            .await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::error::DatabaseErrorType;
    use crate::repository::QueueErrorType;
    use serde_json::json;

    fn store(access: AccessLevel) -> MemoryStore {
        MemoryStore::builder()
            .table(
                TABLE,
                vec![
                    json!({"id": 1, "shop_id": 10, "name": "Walk-ins", "status": "open"}),
                    json!({"id": 2, "shop_id": 10, "name": "Bookings", "status": "paused"}),
                    json!({"id": 3, "shop_id": 10, "name": "VIP", "status": "open"}),
                    json!({"id": 4, "shop_id": 11, "name": "Walk-ins", "status": "closed"}),
                ],
            )
            .rpc(STATS_RPC, |tables, params| {
                let shop = params.get("p_shop_id").cloned().unwrap_or(Value::Null);
                let open = tables
                    .get(TABLE)
                    .map(|rows| {
                        rows.iter()
                            .filter(|r| r.get("shop_id") == Some(&shop))
                            .filter(|r| r.get("status") == Some(&json!("open")))
                            .count()
                    })
                    .unwrap_or(0);
                if open == 0 {
                    return Ok(json!([]));
                }
                Ok(json!([{"waiting": open * 3, "serving": open, "served_today": 12, "average_wait_minutes": 7.5}]))
            })
            .access(access)
            .build()
    }

    fn repo() -> QueueRepository<MemoryStore> {
        QueueRepository::new(Arc::new(store(AccessLevel::Elevated))).unwrap()
    }

    #[test]
    fn test_standard_port_is_rejected_at_construction() {
        let err = QueueRepository::new(Arc::new(store(AccessLevel::Standard)))
            .err()
            .unwrap();
        assert_eq!(err.kind, QueueErrorType::Unauthorized);
        assert_eq!(err.operation.as_deref(), Some("create_queue_repository"));
        assert_eq!(
            err.context.details.get("database_error").map(String::as_str),
            Some(DatabaseErrorType::PermissionDenied.as_str())
        );
    }

    #[tokio::test]
    async fn test_list_by_shop_and_status() {
        let repo = repo();
        let all = repo.list_by_shop(10, None, None, None).await.unwrap();
        assert_eq!(all.pagination.total_items, 3);

        let open = repo
            .list_by_shop(10, Some(QueueStatus::Open), Some(1), Some(1))
            .await
            .unwrap();
        assert_eq!(open.data.len(), 1);
        assert_eq!(open.data[0].name, "Walk-ins");
        assert_eq!(open.pagination.total_pages, 2);
        assert!(open.pagination.has_next_page);
    }

    #[tokio::test]
    async fn test_stats_from_procedure() {
        let stats = repo().stats(10).await.unwrap();
        assert_eq!(stats.waiting, 6);
        assert_eq!(stats.serving, 2);
        assert_eq!(stats.average_wait_minutes, 7.5);
    }

    #[tokio::test]
    async fn test_stats_empty_when_no_rows() {
        assert_eq!(repo().stats(11).await.unwrap(), QueueStats::EMPTY);
    }

    #[tokio::test]
    async fn test_stats_missing_procedure_fails() {
        let repo = QueueRepository::new(Arc::new(MemoryStore::new(AccessLevel::Elevated))).unwrap();
        let err = repo.stats(10).await.unwrap_err();
        assert_eq!(err.kind, QueueErrorType::OperationFailed);
    }

    #[tokio::test]
    async fn test_update_status_is_visible_to_later_reads() {
        let repo = repo();
        let queue = repo.update_status(2, QueueStatus::Open).await.unwrap();
        assert_eq!(queue.status, QueueStatus::Open);
        let reread = repo.find_by_id(2).await.unwrap().unwrap();
        assert_eq!(reread.status, QueueStatus::Open);
        assert_eq!(repo.stats(10).await.unwrap().serving, 3);
    }

    #[tokio::test]
    async fn test_update_missing_queue_not_found() {
        let err = repo()
            .update_status(404, QueueStatus::Closed)
            .await
            .unwrap_err();
        assert_eq!(err.kind, QueueErrorType::NotFound);
        assert_eq!(err.operation.as_deref(), Some("update_queue_status"));
    }
}
