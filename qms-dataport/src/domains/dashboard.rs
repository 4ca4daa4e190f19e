//! Admin dashboard aggregate
//!
//! The summary is assembled from independent counts issued concurrently, each
//! on its own tokio task. There is no partial result: one failed or panicked
//! read fails the whole dashboard.

use futures::future::{try_join_all, FutureExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::port::{PortResult, ReadPort};
use crate::query::{CountOptions, QueryFilter};
use crate::repository::{DashboardError, DomainError, Failure};

/// Headline numbers for the admin dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_shops: u64,
    pub open_queues: u64,
    pub total_customers: u64,
    pub active_categories: u64,
}

/// Spawn every read and wait for all of them
///
/// Resolves to the results in input order, or to the first failure. A
/// panicking read surfaces as [`Failure::Panic`]. Reads still running when
/// another fails are aborted.
pub async fn join_reads<T, F>(reads: Vec<F>) -> Result<Vec<T>, Failure>
where
    T: Send + 'static,
    F: Future<Output = PortResult<T>> + Send + 'static,
{
    let handles: Vec<_> = reads.into_iter().map(tokio::spawn).collect();
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

    let joined = try_join_all(handles.into_iter().map(|handle| {
        handle.map(|joined| match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Failure::from(err)),
            Err(join) => Err(Failure::from_join(join)),
        })
    }))
    .await;

    if joined.is_err() {
        aborts.iter().for_each(|a| a.abort());
    }
    joined
}

/// Count shops, open queues, customers and active categories concurrently
pub async fn load_dashboard<P>(port: Arc<P>) -> Result<DashboardSummary, DashboardError>
where
    P: ReadPort + 'static,
{
    const OP: &str = "load_dashboard";
    let reads = vec![
        ("shops", CountOptions::new()),
        (
            "queues",
            CountOptions::new().filter(QueryFilter::eq("status", "open")),
        ),
        ("customers", CountOptions::new()),
        (
            "categories",
            CountOptions::new().filter(QueryFilter::eq("is_active", true)),
        ),
    ]
    .into_iter()
    .map(|(table, options)| {
        let port = Arc::clone(&port);
        async move { port.count(table, &options).await }
    })
    .collect();

    let counts = join_reads(reads)
        .await
        .map_err(|failure| DashboardError::from_failure(failure, OP))?;

    match counts.as_slice() {
        &[total_shops, open_queues, total_customers, active_categories] => {
            let summary = DashboardSummary {
                total_shops,
                open_queues,
                total_customers,
                active_categories,
            };
            tracing::debug!(?summary, "dashboard assembled");
            Ok(summary)
        }
        other => Err(DashboardError::from_failure(
            Failure::from_anyhow(anyhow::anyhow!(
                "expected 4 counts, got {}",
                other.len()
            )),
            OP,
        )),
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::error::DatabaseError;
    use crate::port::AccessLevel;
    use crate::repository::{DashboardErrorType, UNEXPECTED_ERROR_MESSAGE};
    use serde_json::json;
    use std::time::Duration;

    fn store() -> MemoryStore {
        MemoryStore::builder()
            .table("shops", vec![json!({"id": 1}), json!({"id": 2})])
            .table(
                "queues",
                vec![
                    json!({"id": 1, "status": "open"}),
                    json!({"id": 2, "status": "closed"}),
                    json!({"id": 3, "status": "open"}),
                ],
            )
            .table("customers", vec![json!({"id": 1})])
            .table(
                "categories",
                vec![
                    json!({"id": 1, "is_active": true}),
                    json!({"id": 2, "is_active": false}),
                ],
            )
            .access(AccessLevel::Standard)
            .build()
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let summary = load_dashboard(Arc::new(store())).await.unwrap();
        assert_eq!(
            summary,
            DashboardSummary {
                total_shops: 2,
                open_queues: 2,
                total_customers: 1,
                active_categories: 1,
            }
        );
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["openQueues"], 2);
    }

    #[tokio::test]
    async fn test_one_failed_read_fails_the_dashboard() {
        let store = MemoryStore::builder()
            .table("shops", vec![json!({"id": 1})])
            .access(AccessLevel::Standard)
            .build();
        let err = load_dashboard(Arc::new(store)).await.unwrap_err();
        assert_eq!(err.kind, DashboardErrorType::OperationFailed);
        assert_eq!(err.operation.as_deref(), Some("load_dashboard"));
    }

    #[tokio::test]
    async fn test_join_reads_keeps_order() {
        let reads: Vec<_> = [30_u64, 10, 20]
            .into_iter()
            .map(|delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(delay)
            })
            .collect();
        assert_eq!(join_reads(reads).await.unwrap(), vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_join_reads_error() {
        let reads: Vec<std::pin::Pin<Box<dyn Future<Output = PortResult<u64>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { Err(DatabaseError::connection("pool closed")) }),
        ];
        let failure = join_reads(reads).await.unwrap_err();
        let err = DashboardError::from_failure(failure, "load_dashboard");
        assert_eq!(err.kind, DashboardErrorType::OperationFailed);
        assert_eq!(err.message, "pool closed");
    }

    #[tokio::test]
    async fn test_panicking_read_is_unknown() {
        let reads: Vec<std::pin::Pin<Box<dyn Future<Output = PortResult<u64>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async {
                if u64::MAX > 0 {
                    panic!("counter overflowed");
                }
                Ok(2)
            }),
        ];
        let failure = join_reads(reads).await.unwrap_err();
        assert!(matches!(failure, Failure::Panic(_)));
        let err = DashboardError::from_failure(failure, "load_dashboard");
        assert_eq!(err.kind, DashboardErrorType::Unknown);
        assert_eq!(err.message, UNEXPECTED_ERROR_MESSAGE);
        assert_eq!(
            err.context.details.get("panic").map(String::as_str),
            Some("counter overflowed")
        );
    }
}
