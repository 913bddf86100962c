//! Store errors

use thiserror::Error;

/// Errors that can occur when talking to the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key (leaf or directory) does not exist
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Filesystem error from a file-backed store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error means "no such key"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
