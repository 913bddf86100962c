//! Startup error types.

use embedded_provider::ProviderError;
use kv_store::StoreError;
use thiserror::Error;

/// Errors that can stop the network manager from starting.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Provider could not be built or loaded
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Store could not be opened
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
