//! Embedded Network Resource Provider
//!
//! A self-hosted implementation of the network resource provider contract:
//! VXLAN segment-ID allocation, IPv4 address management, and the lifecycle
//! of logical networks, subnets and ports, all kept in-process and written
//! through to a pluggable key/value store.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use embedded_provider::{EmbeddedProvider, PortRequest, ProviderConfig, ResourceProvider};
//! use kv_store::MemoryStore;
//!
//! # async fn example() -> Result<(), embedded_provider::ProviderError> {
//! let provider = EmbeddedProvider::new(Arc::new(MemoryStore::new()), &ProviderConfig::default()).await?;
//!
//! let network = provider.create_network("net1").await?;
//! let subnet = provider
//!     .create_subnet(&network.id, "192.168.1.0/24", "192.168.1.1", vec![])
//!     .await?;
//!
//! // First unreserved address of the block: 192.168.1.2
//! let port = provider
//!     .create_port(&PortRequest {
//!         network_id: network.id.clone(),
//!         subnet_id: subnet.id.clone(),
//!         network_plane: "eth0".to_string(),
//!         vnic_type: "normal".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **VXLAN IDs**: allocated from `[5000, 15000)`, one per network
//! - **IPAM**: per-subnet pools keyed by offset, with tombstones for released addresses
//! - **Bulk Ports**: all-or-nothing creation with compensating deletes
//! - **Audit**: report-only cross-registry consistency check

pub mod audit;
pub mod config;
pub mod embedded;
pub mod error;
pub mod ip_pool;
pub mod keys;
pub mod models;
pub mod network;
pub mod port;
#[path = "trait.rs"]
pub mod provider_trait;
mod records;
pub mod subnet;
pub mod vxlan;

pub use audit::Finding;
pub use config::{ProviderConfig, ProviderKind};
pub use embedded::EmbeddedProvider;
pub use error::{ErrorKind, ProviderError};
pub use keys::KeyBuilder;
pub use models::*;
pub use provider_trait::ResourceProvider;

use kv_store::KvStore;
use std::sync::Arc;

/// Build the provider selected by `kind`.
///
/// Only the embedded provider is built into this crate; the remote OpenStack
/// kinds are rejected by `ProviderKind::ensure_built`.
pub async fn build_provider(
    kind: ProviderKind,
    store: Arc<dyn KvStore>,
    config: &ProviderConfig,
) -> Result<Arc<dyn ResourceProvider>, ProviderError> {
    kind.ensure_built()?;
    let provider = EmbeddedProvider::new(store, config).await?;
    Ok(Arc::new(provider))
}
