//! Privilege-scoped repository base

use std::future::Future;
use std::sync::Arc;

use tracing::{Instrument, Span};

use crate::config::QueryConfig;
use crate::error::{DatabaseError, ErrorContext};
use crate::pagination::{PaginatedResult, PaginationMeta};
use crate::port::{AccessLevel, Port, PortResult, ReadPort, Row};
use crate::query::{CountOptions, QueryOptions};

/// Port, span and entity name shared by a repository's methods
///
/// Read-only after construction, so one base can serve concurrent requests.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use qms_dataport::backend::MemoryStore;
/// use qms_dataport::error::DatabaseErrorType;
/// use qms_dataport::port::AccessLevel;
/// use qms_dataport::repository::RepositoryBase;
///
/// let standard = Arc::new(MemoryStore::new(AccessLevel::Standard));
/// let err = RepositoryBase::require(standard, "Queue", AccessLevel::Elevated).unwrap_err();
/// assert_eq!(err.kind, DatabaseErrorType::PermissionDenied);
/// ```
#[derive(Debug)]
pub struct RepositoryBase<P> {
    port: Arc<P>,
    entity: &'static str,
    access: AccessLevel,
    span: Span,
    query: QueryConfig,
}

impl<P> Clone for RepositoryBase<P> {
    fn clone(&self) -> Self {
        Self {
            port: Arc::clone(&self.port),
            entity: self.entity,
            access: self.access,
            span: self.span.clone(),
            query: self.query,
        }
    }
}

impl<P: Port> RepositoryBase<P> {
    /// Bind `port` for `entity` at whatever level the port was created with
    pub fn new(port: Arc<P>, entity: &'static str) -> Self {
        let access = port.access_level();
        let span = tracing::info_span!("repository", entity, access = %access);
        Self {
            port,
            entity,
            access,
            span,
            query: QueryConfig::default(),
        }
    }

    /// Bind `port` only if it was created at `required` level or above
    pub fn require(port: Arc<P>, entity: &'static str, required: AccessLevel) -> PortResult<Self> {
        let access = port.access_level();
        if !access.satisfies(required) {
            tracing::error!(entity, %access, %required, "repository refused an under-privileged port");
            return Err(DatabaseError::permission_denied(format!(
                "{} repository requires a {} port, got {}",
                entity, required, access
            ))
            .with_operation("construct")
            .with_context(ErrorContext::new().detail("required_access", required)));
        }
        Ok(Self::new(port, entity))
    }

    /// Replace the pagination defaults
    pub fn with_query_config(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// The bound port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Shared handle to the bound port
    pub fn port_handle(&self) -> Arc<P> {
        Arc::clone(&self.port)
    }

    /// Entity name used in errors and the span
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Privilege level of the bound port
    pub fn access_level(&self) -> AccessLevel {
        self.access
    }

    /// Page size defaults and count mode
    pub fn query_config(&self) -> &QueryConfig {
        &self.query
    }

    /// The `repository` span every method runs in
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `fut` inside this repository's span
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        fut.instrument(self.span.clone()).await
    }
}

impl<P: ReadPort> RepositoryBase<P> {
    /// Fetch one page of `table` with its metadata
    ///
    /// The page size falls back to and is capped by the [`QueryConfig`]. The
    /// count and the page are read concurrently; either failing fails the
    /// whole call.
    pub async fn paginate(
        &self,
        table: &str,
        options: QueryOptions,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> PortResult<PaginatedResult<Row>> {
        let (page, size) = self.query.page_request(page, page_size);
        let options = options.paginate(page, size);
        options.validate()?;
        let count = CountOptions::matching(&options, self.query.default_count_mode);

        self.run(async {
            let (total, rows) = futures::try_join!(
                self.port.count(table, &count),
                self.port.get_advanced(table, &options),
            )?;
            let meta = PaginationMeta::compute(page, size, total)?;
            tracing::debug!(table, page, size, total, rows = rows.len(), "page fetched");
            PaginatedResult::new(rows, meta).map_err(DatabaseError::from)
        })
        .await
    }
}
