//! Pagination metadata
//!
//! One algorithm, applied identically to every paginated read:
//!
//! - `total_pages = ceil(total_items / items_per_page)`, 0 for an empty set
//! - `has_next_page = current_page < total_pages`
//! - `has_prev_page = current_page > 1`, regardless of `total_pages`
//!
//! Page numbers below 1 and empty pages are rejected, never clamped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{DatabaseError, ErrorContext};

/// Invalid pagination input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    /// Page number below 1
    #[error("page must be at least 1, got {0}")]
    InvalidPage(u64),

    /// Zero items per page
    #[error("items per page must be at least 1")]
    InvalidPageSize,

    /// More items than the page holds
    #[error("page holds at most {items_per_page} items, got {len}")]
    Overflow {
        /// Items supplied
        len: usize,
        /// Page capacity
        items_per_page: u64,
    },
}

impl From<PaginationError> for DatabaseError {
    fn from(err: PaginationError) -> Self {
        let field = match err {
            PaginationError::InvalidPage(_) => "page",
            PaginationError::InvalidPageSize | PaginationError::Overflow { .. } => {
                "items_per_page"
            }
        };
        DatabaseError::validation(err.to_string())
            .with_context(ErrorContext::new().field(field))
            .with_source(err)
    }
}

/// Pagination metadata for list results
///
/// # Example
///
/// ```rust
/// use qms_dataport::pagination::PaginationMeta;
///
/// let meta = PaginationMeta::compute(1, 10, 25).unwrap();
/// assert_eq!(meta.total_pages, 3);
/// assert!(meta.has_next_page);
/// assert!(!meta.has_prev_page);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    /// Current page number (1-indexed)
    pub current_page: u64,
    /// Total number of pages
    pub total_pages: u64,
    /// Total number of items across all pages
    pub total_items: u64,
    /// Number of items per page
    pub items_per_page: u64,
    /// Whether there is a next page
    pub has_next_page: bool,
    /// Whether there is a previous page
    pub has_prev_page: bool,
}

impl PaginationMeta {
    /// Compute metadata for `page` of a set of `total_items`
    pub fn compute(
        page: u64,
        items_per_page: u64,
        total_items: u64,
    ) -> Result<Self, PaginationError> {
        if page < 1 {
            return Err(PaginationError::InvalidPage(page));
        }
        if items_per_page == 0 {
            return Err(PaginationError::InvalidPageSize);
        }

        let total_pages = total_items.div_ceil(items_per_page);

        Ok(Self {
            current_page: page,
            total_pages,
            total_items,
            items_per_page,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        })
    }
}

/// Free-function form of [`PaginationMeta::compute`]
pub fn compute_meta(
    page: u64,
    items_per_page: u64,
    total_items: u64,
) -> Result<PaginationMeta, PaginationError> {
    PaginationMeta::compute(page, items_per_page, total_items)
}

/// A page of items with its metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginatedResult<T> {
    /// Items on this page
    pub data: Vec<T>,
    /// Page metadata
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResult<T> {
    /// Wrap a page, rejecting more items than the page holds
    pub fn new(data: Vec<T>, pagination: PaginationMeta) -> Result<Self, PaginationError> {
        if data.len() as u64 > pagination.items_per_page {
            return Err(PaginationError::Overflow {
                len: data.len(),
                items_per_page: pagination.items_per_page,
            });
        }
        Ok(Self { data, pagination })
    }

    /// Convert every item, keeping the metadata
    pub fn try_map<U, E, F>(self, f: F) -> Result<PaginatedResult<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        let data = self.data.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(PaginatedResult {
            data,
            pagination: self.pagination,
        })
    }

    /// Whether the page is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
