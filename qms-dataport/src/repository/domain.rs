//! Domain error mapping
//!
//! Every bounded context owns a narrow error type declared with
//! [`define_domain_error!`](crate::define_domain_error). All of them share one
//! total mapping from a [`Failure`] (anything a repository method can run
//! into) to a domain error, checked in this order:
//!
//! 1. the context's own error passes through unchanged
//! 2. [`RepositoryError`] not found / already exists / operation failed
//! 3. [`DatabaseError`], through a fixed kind table
//! 4. any other error becomes `UNKNOWN`, prefixed with the operation
//! 5. a panic payload becomes `UNKNOWN` with a generic message
//!
//! The original error is kept as the mapped error's `source()`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinError;

use super::error::{RepositoryError, RepositoryErrorKind};
use crate::error::{Cause, DatabaseError, DatabaseErrorType, ErrorContext};

/// Message used when a task panicked instead of returning an error
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Anything a repository operation can fail with
pub enum Failure {
    /// An error value
    Error(anyhow::Error),
    /// The payload of a panicked task
    Panic(Box<dyn Any + Send + 'static>),
}

impl Failure {
    /// Wrap an `anyhow` error
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        Failure::Error(err)
    }

    /// Unwrap a task join failure, keeping a panic payload as a panic
    pub fn from_join(err: JoinError) -> Self {
        if err.is_panic() {
            Failure::Panic(err.into_panic())
        } else {
            Failure::Error(anyhow::Error::new(err))
        }
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Failure::Error(anyhow::Error::new(err))
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Failure::Panic(payload) => f
                .debug_tuple("Panic")
                .field(&panic_message(payload.as_ref()))
                .finish(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The kinds every domain error type shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainErrorKind {
    NotFound,
    AlreadyExists,
    ValidationError,
    Unauthorized,
    OperationFailed,
    ConstraintViolation,
    Unknown,
}

impl DomainErrorKind {
    /// Upper-snake-case code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// The fixed storage-kind table
    pub fn from_database(kind: DatabaseErrorType) -> Self {
        match kind {
            DatabaseErrorType::NotFound => Self::NotFound,
            DatabaseErrorType::DuplicateEntry => Self::AlreadyExists,
            DatabaseErrorType::ValidationError => Self::ValidationError,
            DatabaseErrorType::ConstraintViolation => Self::ConstraintViolation,
            DatabaseErrorType::PermissionDenied => Self::Unauthorized,
            _ => Self::OperationFailed,
        }
    }

    fn from_repository(kind: RepositoryErrorKind) -> Self {
        match kind {
            RepositoryErrorKind::NotFound => Self::NotFound,
            RepositoryErrorKind::AlreadyExists => Self::AlreadyExists,
            RepositoryErrorKind::OperationFailed => Self::OperationFailed,
        }
    }
}

impl fmt::Display for DomainErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of mapping a [`Failure`], ready to build a domain error from
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: DomainErrorKind,
    pub message: String,
    pub operation: String,
    pub context: ErrorContext,
    pub cause: Option<Cause>,
}

/// Map a failure that is not already the caller's own domain error
pub fn classify(failure: Failure, operation: &str) -> Classified {
    let err = match failure {
        Failure::Panic(payload) => {
            let detail = panic_message(payload.as_ref());
            tracing::error!(operation, panic = %detail, "repository task panicked");
            return Classified {
                kind: DomainErrorKind::Unknown,
                message: UNEXPECTED_ERROR_MESSAGE.to_string(),
                operation: operation.to_string(),
                context: ErrorContext::new().detail("panic", detail),
                cause: None,
            };
        }
        Failure::Error(err) => err,
    };

    let (kind, message, context) = if let Some(repo) = err.downcast_ref::<RepositoryError>() {
        let mut context = ErrorContext::new();
        if let Some(entity) = &repo.entity_type {
            context = context.table(entity.clone());
        }
        if let Some(id) = &repo.entity_id {
            context = context.entity_id(id);
        }
        (
            DomainErrorKind::from_repository(repo.kind),
            repo.message.clone(),
            context,
        )
    } else if let Some(db) = err.downcast_ref::<DatabaseError>() {
        let mut context = db.context.clone();
        if let Some(port_op) = &db.operation {
            context = context.detail("port_operation", port_op);
        }
        context = context.detail("database_error", db.kind);
        (
            DomainErrorKind::from_database(db.kind),
            db.message.clone(),
            context,
        )
    } else {
        (
            DomainErrorKind::Unknown,
            format!("{} failed: {}", operation, err),
            ErrorContext::new(),
        )
    };

    if kind == DomainErrorKind::Unknown {
        tracing::error!(operation, kind = %kind, "unclassified repository failure: {:#}", err);
    } else {
        let retriable = err
            .downcast_ref::<DatabaseError>()
            .is_some_and(DatabaseError::is_retriable);
        tracing::warn!(operation, kind = %kind, retriable, "repository failure: {}", message);
    }

    let cause: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
    Classified {
        kind,
        message,
        operation: operation.to_string(),
        context,
        cause: Some(Arc::from(cause)),
    }
}

/// A per-context error type with a total mapping from [`Failure`]
pub trait DomainError: std::error::Error + Send + Sync + Sized + 'static {
    /// Map any failure of `operation` into this error type
    fn from_failure(failure: Failure, operation: &str) -> Self;
}

/// `map_err` into a domain error
pub trait MapFailure<T> {
    /// Map the error of `operation` through [`DomainError::from_failure`]
    fn map_domain<D: DomainError>(self, operation: &str) -> Result<T, D>;
}

impl<T, E: Into<Failure>> MapFailure<T> for Result<T, E> {
    fn map_domain<D: DomainError>(self, operation: &str) -> Result<T, D> {
        self.map_err(|err| D::from_failure(err.into(), operation))
    }
}

/// Declare a bounded context's error kind enum and error type
///
/// ```rust
/// use qms_dataport::define_domain_error;
/// use qms_dataport::error::DatabaseError;
/// use qms_dataport::repository::{DomainError, Failure};
///
/// define_domain_error!(
///     /// Errors raised by ticket repositories
///     TicketError, TicketErrorType, "Ticket"
/// );
///
/// let err = TicketError::from_failure(
///     Failure::from(DatabaseError::permission_denied("row-level policy")),
///     "close_ticket",
/// );
/// assert_eq!(err.kind, TicketErrorType::Unauthorized);
/// assert_eq!(err.operation.as_deref(), Some("close_ticket"));
/// ```
#[macro_export]
macro_rules! define_domain_error {
    ($(#[$meta:meta])* $error:ident, $kind:ident, $entity:literal) => {
        #[doc = concat!("Kinds of ", $entity, " failure")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $kind {
            NotFound,
            AlreadyExists,
            ValidationError,
            Unauthorized,
            OperationFailed,
            ConstraintViolation,
            Unknown,
        }

        impl $kind {
            /// Upper-snake-case code
            pub fn as_str(&self) -> &'static str {
                $crate::repository::DomainErrorKind::from(*self).as_str()
            }
        }

        impl ::std::convert::From<$crate::repository::DomainErrorKind> for $kind {
            fn from(kind: $crate::repository::DomainErrorKind) -> Self {
                use $crate::repository::DomainErrorKind as K;
                match kind {
                    K::NotFound => Self::NotFound,
                    K::AlreadyExists => Self::AlreadyExists,
                    K::ValidationError => Self::ValidationError,
                    K::Unauthorized => Self::Unauthorized,
                    K::OperationFailed => Self::OperationFailed,
                    K::ConstraintViolation => Self::ConstraintViolation,
                    K::Unknown => Self::Unknown,
                }
            }
        }

        impl ::std::convert::From<$kind> for $crate::repository::DomainErrorKind {
            fn from(kind: $kind) -> Self {
                match kind {
                    $kind::NotFound => Self::NotFound,
                    $kind::AlreadyExists => Self::AlreadyExists,
                    $kind::ValidationError => Self::ValidationError,
                    $kind::Unauthorized => Self::Unauthorized,
                    $kind::OperationFailed => Self::OperationFailed,
                    $kind::ConstraintViolation => Self::ConstraintViolation,
                    $kind::Unknown => Self::Unknown,
                }
            }
        }

        impl ::std::fmt::Display for $kind {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $error {
            /// What went wrong
            pub kind: $kind,
            /// Human-readable message
            pub message: String,
            /// Repository operation that failed
            pub operation: Option<String>,
            /// Diagnostic details
            pub context: $crate::error::ErrorContext,
            cause: Option<$crate::error::Cause>,
        }

        impl $error {
            /// Create an error of `kind`
            pub fn new(kind: $kind, message: impl Into<String>) -> Self {
                Self {
                    kind,
                    message: message.into(),
                    operation: None,
                    context: $crate::error::ErrorContext::new(),
                    cause: None,
                }
            }

            /// Set the operation name
            pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
                self.operation = Some(operation.into());
                self
            }

            /// Set the diagnostic context
            pub fn with_context(mut self, context: $crate::error::ErrorContext) -> Self {
                self.context = context;
                self
            }

            /// Keep `cause` as the source
            pub fn with_cause<E>(mut self, cause: E) -> Self
            where
                E: ::std::error::Error + Send + Sync + 'static,
            {
                self.cause = Some(::std::sync::Arc::new(cause));
                self
            }

            /// The original failure, if any
            pub fn cause(&self) -> Option<&$crate::error::Cause> {
                self.cause.as_ref()
            }
        }

        impl ::std::fmt::Display for $error {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match &self.operation {
                    Some(op) => write!(f, "{} {} error during {}: {}", $entity, self.kind, op, self.message)?,
                    None => write!(f, "{} {} error: {}", $entity, self.kind, self.message)?,
                }
                if !self.context.is_empty() {
                    write!(f, " [{}]", self.context)?;
                }
                Ok(())
            }
        }

        impl ::std::error::Error for $error {
            fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
                self.cause
                    .as_deref()
                    .map(|e| e as &(dyn ::std::error::Error + 'static))
            }
        }

        impl $crate::repository::DomainError for $error {
            fn from_failure(failure: $crate::repository::Failure, operation: &str) -> Self {
                let failure = match failure {
                    $crate::repository::Failure::Error(err) => match err.downcast::<Self>() {
                        Ok(own) => return own,
                        Err(err) => $crate::repository::Failure::Error(err),
                    },
                    panic => panic,
                };
                let mapped = $crate::repository::classify(failure, operation);
                Self {
                    kind: mapped.kind.into(),
                    message: mapped.message,
                    operation: Some(mapped.operation),
                    context: mapped.context,
                    cause: mapped.cause,
                }
            }
        }
    };
}
