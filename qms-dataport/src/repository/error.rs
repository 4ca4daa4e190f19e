//! Backend-agnostic repository failures
//!
//! These are the three generic conditions a repository raises on its own,
//! independent of any storage backend. Domain mappings recognize them before
//! looking at [`DatabaseError`](crate::error::DatabaseError).
//!
//! # Example
//!
//! ```rust
//! use qms_dataport::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("Category", "12");
//! assert_eq!(error.kind, RepositoryErrorKind::NotFound);
//! assert_eq!(error.to_string(), "Repository not_found error during find_by_id: Entity not found [Category: 12]");
//! ```

use std::fmt;

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Entity was not found
    NotFound,
    /// Entity already exists
    AlreadyExists,
    /// A read or write could not be completed
    OperationFailed,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::OperationFailed => write!(f, "operation_failed"),
        }
    }
}

/// Repository error with the operation and entity involved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// Operation being performed
    pub operation: String,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Category", "Queue")
    pub entity_type: Option<String>,
    /// Identifier of the entity involved
    pub entity_id: Option<String>,
}

impl RepositoryError {
    /// Create a repository error without entity details
    pub fn new(
        operation: impl Into<String>,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Entity `entity_id` of `entity_type` does not exist
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new("find_by_id", RepositoryErrorKind::NotFound, "Entity not found")
            .with_entity(entity_type, entity_id)
    }

    /// An entity identified by `identifier` already exists
    pub fn already_exists(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::new("create", RepositoryErrorKind::AlreadyExists, "Entity already exists")
            .with_entity(entity_type, identifier)
    }

    /// `operation` could not be completed
    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::OperationFailed, message)
    }

    /// Attach the entity involved
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Replace the operation name
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(entity_type), Some(entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(RepositoryErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(RepositoryErrorKind::AlreadyExists.to_string(), "already_exists");
        assert_eq!(
            RepositoryErrorKind::OperationFailed.to_string(),
            "operation_failed"
        );
    }

    #[test]
    fn test_already_exists_carries_identifier() {
        let error = RepositoryError::already_exists("Category", "Haircuts");
        assert_eq!(error.operation, "create");
        assert_eq!(error.entity_id.as_deref(), Some("Haircuts"));
    }

    #[test]
    fn test_display_without_entity() {
        let error = RepositoryError::operation_failed("list_by_shop", "row could not be decoded");
        assert_eq!(
            error.to_string(),
            "Repository operation_failed error during list_by_shop: row could not be decoded"
        );
    }

    #[test]
    fn test_with_operation_overrides() {
        let error = RepositoryError::not_found("Queue", "7").with_operation("update_status");
        assert_eq!(error.operation, "update_status");
        assert_eq!(error.kind, RepositoryErrorKind::NotFound);
    }
}
