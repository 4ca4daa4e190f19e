//! Repository building blocks
//!
//! - [`RepositoryBase`]: binds a data port, a tracing span and an entity name,
//!   optionally requiring an elevated port at construction
//! - [`RepositoryError`]: backend-agnostic not found / already exists /
//!   operation failed
//! - [`define_domain_error!`](crate::define_domain_error) and [`DomainError`]:
//!   one narrow error type per bounded context with a total mapping from any
//!   [`Failure`]
//!
//! # Example
//!
//! ```rust
//! use qms_dataport::error::DatabaseError;
//! use qms_dataport::repository::{CategoryError, CategoryErrorType, MapFailure};
//!
//! let result: Result<(), DatabaseError> = Err(DatabaseError::duplicate_entry("name taken"));
//! let err: CategoryError = result.map_domain("create_category").unwrap_err();
//! assert_eq!(err.kind, CategoryErrorType::AlreadyExists);
//! ```

mod base;
mod contexts;
mod domain;
mod error;

pub use base::RepositoryBase;
pub use contexts::{
    CategoryError, CategoryErrorType, CustomerError, CustomerErrorType, DashboardError,
    DashboardErrorType, EmployeeError, EmployeeErrorType, PaymentError, PaymentErrorType,
    QueueError, QueueErrorType, ServiceError, ServiceErrorType, ShopError, ShopErrorType,
    VideoError, VideoErrorType,
};
pub use domain::{
    classify, Classified, DomainError, DomainErrorKind, Failure, MapFailure,
    UNEXPECTED_ERROR_MESSAGE,
};
pub use error::{RepositoryError, RepositoryErrorKind};
