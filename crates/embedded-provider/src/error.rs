//! Provider errors

use kv_store::StoreError;
use thiserror::Error;

/// Errors returned by the embedded provider and its registries
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Lookup by identity failed (network, subnet, or port)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identity collision on create, or delete blocked by live references
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or out-of-range input (CIDR, address, offset, address in use)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// VXLAN range or subnet address pool has nothing left
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Capability the embedded provider does not offer
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Store call failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bulk port creation failed; every port created before `index` was rolled back
    #[error("Bulk port create failed at request {index} ({rolled_back} ports rolled back): {source}")]
    BulkCreate {
        /// Zero-based index of the failing request
        index: usize,
        /// Number of ports deleted by the rollback
        rolled_back: usize,
        /// Error of the failing request
        source: Box<ProviderError>,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse error taxonomy, for callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    ResourceExhausted,
    Unsupported,
    Persistence,
    Configuration,
}

impl ProviderError {
    /// Taxonomy of this error. A bulk failure reports the kind of its cause.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::Conflict(_) => ErrorKind::Conflict,
            ProviderError::Validation(_) => ErrorKind::Validation,
            ProviderError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ProviderError::Unsupported(_) => ErrorKind::Unsupported,
            ProviderError::Persistence(_) | ProviderError::Serialization(_) => {
                ErrorKind::Persistence
            }
            ProviderError::BulkCreate { source, .. } => source.kind(),
            ProviderError::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }

    /// True for `ErrorKind::NotFound`
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result alias used throughout the provider
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_error_reports_cause_kind() {
        let err = ProviderError::BulkCreate {
            index: 2,
            rolled_back: 2,
            source: Box::new(ProviderError::Validation("ip already in use".to_string())),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("request 2"));
    }

    #[test]
    fn test_store_errors_are_persistence() {
        let err: ProviderError = StoreError::Backend("disk full".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("disk full"), "Cause should be wrapped: {err}");
    }
}
