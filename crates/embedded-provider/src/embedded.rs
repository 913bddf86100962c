//! Embedded resource provider
//!
//! Composes the VXLAN allocator and the network, subnet and port registries
//! into a `ResourceProvider`. Every registry loads its state from the store
//! when the provider is built, once, at process start.
//!
//! Cross-registry operations (network delete cascading into subnet delete,
//! port create drawing from a subnet pool) take each registry's lock in turn.
//! There is no transaction spanning registries: a failure partway through a
//! cascade leaves whatever already happened in place. `audit` reports such
//! leftovers.
//!
//! Routers, VM attachment and provider networks have no meaning for a flat,
//! self-hosted VXLAN overlay; those operations fail with
//! `ProviderError::Unsupported`.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{ProviderError, Result};
use crate::keys::KeyBuilder;
use crate::models::*;
use crate::network::NetworkRegistry;
use crate::port::PortRegistry;
use crate::provider_trait::ResourceProvider;
use crate::subnet::SubnetRegistry;
use crate::vxlan::VxlanAllocator;
use kv_store::KvStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// In-process `ResourceProvider`
#[derive(Debug)]
pub struct EmbeddedProvider {
    pub(crate) vxlan: VxlanAllocator,
    pub(crate) networks: NetworkRegistry,
    pub(crate) subnets: SubnetRegistry,
    pub(crate) ports: PortRegistry,
    attach_concurrency: AtomicUsize,
}

impl EmbeddedProvider {
    /// Build the provider, loading every registry from `store`
    pub async fn new(store: Arc<dyn KvStore>, config: &ProviderConfig) -> Result<Self> {
        config.validate()?;
        let keys = KeyBuilder::new(config.key_prefix.clone());
        Self::with_vxlan(
            VxlanAllocator::load(Arc::clone(&store), &keys).await?,
            store,
            keys,
            config,
        )
        .await
    }

    /// Build the provider around an already-loaded VXLAN allocator
    pub async fn with_vxlan(
        vxlan: VxlanAllocator,
        store: Arc<dyn KvStore>,
        keys: KeyBuilder,
        config: &ProviderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let networks = NetworkRegistry::load(Arc::clone(&store), keys.clone()).await?;
        let subnets = SubnetRegistry::load(Arc::clone(&store), keys.clone()).await?;
        let ports = PortRegistry::load(store, keys).await?;

        let provider = Self {
            vxlan,
            networks,
            subnets,
            ports,
            attach_concurrency: AtomicUsize::new(config.attach_concurrency),
        };
        let inventory = provider.inventory().await;
        info!(
            "Embedded provider ready: {} networks, {} subnets, {} ports, {} VXLAN IDs",
            inventory.networks, inventory.subnets, inventory.ports, inventory.vxlan_ids
        );
        Ok(provider)
    }

    /// All live networks, in unspecified order
    pub async fn list_networks(&self) -> Vec<NetworkAttrs> {
        self.networks.list().await
    }

    /// All live subnets, in unspecified order
    pub async fn list_subnets(&self) -> Vec<Subnet> {
        self.subnets.list().await
    }

    /// Counts of live entities
    pub async fn inventory(&self) -> Inventory {
        Inventory {
            networks: self.networks.count().await,
            subnets: self.subnets.count().await,
            ports: self.ports.count().await,
            vxlan_ids: self.vxlan.allocated_ids().await.len(),
        }
    }
}

fn unsupported(operation: &str) -> ProviderError {
    warn!("Rejected {}: not supported by the embedded provider", operation);
    ProviderError::Unsupported(format!("{operation} is not supported by the embedded provider"))
}

#[async_trait::async_trait]
impl ResourceProvider for EmbeddedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Embedded
    }

    // Network Operations
    async fn create_network(&self, name: &str) -> Result<Network> {
        self.networks.create_network(name, &self.vxlan).await
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.networks
            .delete_network(id, &self.vxlan, &self.subnets, &self.ports)
            .await
    }

    async fn get_network(&self, id: &str) -> Result<Network> {
        self.networks.get_network(id).await
    }

    async fn get_network_id(&self, name: &str) -> Result<String> {
        self.networks.get_network_id(name).await
    }

    async fn get_network_extended_attrs(&self, id: &str) -> Result<NetworkAttrs> {
        self.networks.get_network_attrs(id).await
    }

    async fn create_provider_network(
        &self,
        _name: &str,
        _network_type: &str,
        _physical_network: &str,
        _segmentation_id: &str,
    ) -> Result<Network> {
        Err(unsupported("create_provider_network"))
    }

    // Subnet Operations
    async fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        gateway: &str,
        pools: Vec<AllocationPool>,
    ) -> Result<Subnet> {
        self.subnets
            .create_subnet(&self.networks, network_id, cidr, gateway, pools)
            .await
    }

    async fn delete_subnet(&self, id: &str) -> Result<()> {
        self.subnets.delete_subnet(id, &self.ports).await
    }

    async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        self.subnets.get_subnet(id).await
    }

    async fn get_subnet_id(&self, network_id: &str) -> Result<String> {
        self.subnets.get_subnet_id(network_id).await
    }

    // Port Operations
    async fn create_port(&self, request: &PortRequest) -> Result<Port> {
        self.ports
            .create_port(&self.networks, &self.subnets, request)
            .await
    }

    async fn create_bulk_ports(&self, requests: &[PortRequest]) -> Result<Vec<Port>> {
        self.ports
            .create_bulk_ports(&self.networks, &self.subnets, requests)
            .await
    }

    async fn get_port(&self, id: &str) -> Result<Port> {
        self.ports.get_port(id).await
    }

    async fn delete_port(&self, id: &str) -> Result<()> {
        self.ports.delete_port(id, &self.subnets).await
    }

    async fn list_ports(&self, network_id: &str) -> Result<Vec<Port>> {
        Ok(self.ports.list_ports(network_id).await)
    }

    fn attach_concurrency(&self) -> usize {
        self.attach_concurrency.load(Ordering::SeqCst)
    }

    fn set_attach_concurrency(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(ProviderError::Validation(
                "attach concurrency must be at least 1".to_string(),
            ));
        }
        self.attach_concurrency.store(limit, Ordering::SeqCst);
        info!("Attach concurrency set to {}", limit);
        Ok(())
    }

    // Router Operations
    async fn create_router(&self, _name: &str, _ext_net_id: &str) -> Result<String> {
        Err(unsupported("create_router"))
    }

    async fn update_router(&self, _id: &str, _name: &str, _ext_net_id: &str) -> Result<()> {
        Err(unsupported("update_router"))
    }

    async fn get_router(&self, _id: &str) -> Result<Router> {
        Err(unsupported("get_router"))
    }

    async fn delete_router(&self, _id: &str) -> Result<()> {
        Err(unsupported("delete_router"))
    }

    async fn attach_net_to_router(&self, _router_id: &str, _subnet_id: &str) -> Result<String> {
        Err(unsupported("attach_net_to_router"))
    }

    async fn detach_net_from_router(&self, _router_id: &str, _network_id: &str) -> Result<String> {
        Err(unsupported("detach_net_from_router"))
    }

    // VM Operations
    async fn attach_port_to_vm(&self, _vm_id: &str, _port_id: &str) -> Result<Port> {
        Err(unsupported("attach_port_to_vm"))
    }

    async fn detach_port_from_vm(&self, _vm_id: &str, _port_id: &str) -> Result<()> {
        Err(unsupported("detach_port_from_vm"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryStore;

    async fn provider() -> EmbeddedProvider {
        EmbeddedProvider::new(Arc::new(MemoryStore::new()), &ProviderConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_attach_concurrency_setting() {
        let p = provider().await;
        assert_eq!(p.attach_concurrency(), 5);

        p.set_attach_concurrency(12).unwrap();
        assert_eq!(p.attach_concurrency(), 12);

        assert!(matches!(
            p.set_attach_concurrency(0),
            Err(ProviderError::Validation(_))
        ));
        assert_eq!(p.attach_concurrency(), 12);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = ProviderConfig {
            attach_concurrency: 0,
            ..Default::default()
        };
        let err = EmbeddedProvider::new(Arc::new(MemoryStore::new()), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_inventory_counts() {
        let p = provider().await;
        let net = p.create_network("net1").await.unwrap();
        let subnet = p
            .create_subnet(&net.id, "10.1.0.0/24", "10.1.0.1", vec![])
            .await
            .unwrap();
        p.create_port(&PortRequest {
            network_id: net.id.clone(),
            subnet_id: subnet.id.clone(),
            network_plane: "eth0".to_string(),
            vnic_type: "normal".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert_eq!(
            p.inventory().await,
            Inventory {
                networks: 1,
                subnets: 1,
                ports: 1,
                vxlan_ids: 1,
            }
        );
        assert_eq!(p.list_networks().await.len(), 1);
        assert_eq!(p.list_subnets().await, vec![subnet]);
    }
}
