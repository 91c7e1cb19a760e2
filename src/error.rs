//! Error types for the index engine.

use crate::types::PageNo;
use thiserror::Error;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur in the index engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page lies outside the index file
    #[error("Page {0} not found")]
    PageNotFound(PageNo),

    /// Every resident page is pinned; the cache is too small for a single
    /// root-to-leaf lock chain
    #[error("Page cache exhausted: all resident pages are locked")]
    CacheFull,

    /// Data corruption detected (malformed length array, bad overflow chain)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// A page carried the wrong tag for the structure expected there
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state or index kind
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Key exceeds maximum allowed size
    #[error("Key too large: {size} bytes (max: {max})")]
    KeyTooLarge { size: usize, max: usize },

    /// Parameter sidecar file is missing fields or malformed
    #[error("Invalid index parameters: {0}")]
    InvalidParams(String),
}

impl IndexError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid page error
    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid parameters error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }
}
