//! Network registry
//!
//! Owns the logical networks and the VXLAN ID each one holds. A live network
//! always holds exactly one allocated VXLAN ID; it is released only by
//! `delete_network`.

use crate::error::{ProviderError, Result};
use crate::keys::KeyBuilder;
use crate::models::{NETWORK_TYPE_VXLAN, Network, NetworkAttrs, PHYSICAL_NETWORK};
use crate::port::PortRegistry;
use crate::records::{load_records, save_record};
use crate::subnet::SubnetRegistry;
use crate::vxlan::VxlanAllocator;
use kv_store::KvStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Network registry
pub struct NetworkRegistry {
    store: Arc<dyn KvStore>,
    keys: KeyBuilder,
    networks: RwLock<HashMap<String, NetworkAttrs>>,
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry").finish_non_exhaustive()
    }
}

impl NetworkRegistry {
    /// Load every persisted network
    pub async fn load(store: Arc<dyn KvStore>, keys: KeyBuilder) -> Result<Self> {
        let records: Vec<NetworkAttrs> = load_records(store.as_ref(), &keys.networks_dir()).await?;
        info!("Loaded {} networks", records.len());

        let networks = records.into_iter().map(|n| (n.id.clone(), n)).collect();
        Ok(Self {
            store,
            keys,
            networks: RwLock::new(networks),
        })
    }

    /// Create a network, allocating its VXLAN ID first.
    ///
    /// The VXLAN ID is freed again if anything after the allocation fails.
    pub async fn create_network(&self, name: &str, vxlan: &VxlanAllocator) -> Result<Network> {
        let segmentation_id = vxlan.alloc().await?;

        let attrs = NetworkAttrs {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            network_type: NETWORK_TYPE_VXLAN.to_string(),
            physical_network: PHYSICAL_NETWORK.to_string(),
            segmentation_id,
        };

        if self.networks.read().await.contains_key(&attrs.id) {
            release_vxlan(vxlan, &attrs.segmentation_id).await;
            return Err(ProviderError::Conflict(format!(
                "network {} already exists",
                attrs.id
            )));
        }

        if let Err(e) = save_record(self.store.as_ref(), &self.keys.network(&attrs.id), &attrs).await {
            release_vxlan(vxlan, &attrs.segmentation_id).await;
            return Err(e);
        }

        let network = attrs.to_network();
        info!(
            "Created network {} ({}) with VXLAN ID {}",
            attrs.name, attrs.id, attrs.segmentation_id
        );
        self.networks.write().await.insert(attrs.id.clone(), attrs);
        Ok(network)
    }

    /// Delete a network, cascading to its bound subnet.
    ///
    /// Steps run in order and are not undone if a later one fails:
    /// 1. delete the bound subnet, if any (fails while ports still use it)
    /// 2. free the VXLAN ID
    /// 3. delete the persisted network record
    /// 4. drop the network from memory
    ///
    /// A failure at step 2 leaves the network live but without its subnet; a
    /// failure at step 3 additionally leaves the network live with its
    /// VXLAN ID already back in the pool.
    pub async fn delete_network(
        &self,
        id: &str,
        vxlan: &VxlanAllocator,
        subnets: &SubnetRegistry,
        ports: &PortRegistry,
    ) -> Result<()> {
        let attrs = self.get_network_attrs(id).await?;

        if let Some(subnet_id) = subnets.find_by_network(id).await {
            debug!("Network {} is bound to subnet {}, deleting it first", id, subnet_id);
            subnets.delete_subnet(&subnet_id, ports).await?;
        }

        vxlan.free(&attrs.segmentation_id).await?;
        self.store.delete_leaf(&self.keys.network(id)).await?;
        self.networks.write().await.remove(id);

        info!("Deleted network {} ({})", attrs.name, id);
        Ok(())
    }

    /// Public projection of a network
    pub async fn get_network(&self, id: &str) -> Result<Network> {
        self.get_network_attrs(id).await.map(|n| n.to_network())
    }

    /// Full network record
    pub async fn get_network_attrs(&self, id: &str) -> Result<NetworkAttrs> {
        self.networks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("network {id} not found")))
    }

    /// ID of the first network named `name`.
    ///
    /// Names are not unique; with duplicates, which one is returned is unspecified.
    pub async fn get_network_id(&self, name: &str) -> Result<String> {
        self.networks
            .read()
            .await
            .values()
            .find(|n| n.name == name)
            .map(|n| n.id.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("network named {name} not found")))
    }

    /// True when the network is live
    pub async fn exists(&self, id: &str) -> bool {
        self.networks.read().await.contains_key(id)
    }

    /// Snapshot of all live networks, in unspecified order
    pub async fn list(&self) -> Vec<NetworkAttrs> {
        self.networks.read().await.values().cloned().collect()
    }

    /// Number of live networks
    pub async fn count(&self) -> usize {
        self.networks.read().await.len()
    }
}

async fn release_vxlan(vxlan: &VxlanAllocator, id: &str) {
    if let Err(e) = vxlan.free(id).await {
        error!("Failed to release VXLAN ID {} after network create failed: {}", id, e);
    }
}
