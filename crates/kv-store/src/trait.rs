//! KvStore trait
//!
//! Abstracts the persistent store so the provider registries can run against
//! an in-memory map in tests and a durable backend in production.

use crate::error::StoreError;

/// Persistent key/value store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Save a leaf value, replacing any previous value
    async fn save_leaf(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read a leaf value. Fails with `StoreError::NotFound` when absent.
    async fn read_leaf(&self, key: &str) -> Result<String, StoreError>;

    /// Delete a leaf. Fails with `StoreError::NotFound` when absent.
    async fn delete_leaf(&self, key: &str) -> Result<(), StoreError>;

    /// List the immediate children of a directory key, as full keys.
    /// Fails with `StoreError::NotFound` when the directory does not exist.
    async fn read_dir(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
