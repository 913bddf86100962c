//! Port registry
//!
//! Owns logical ports. Creating a port draws an address from the owning
//! subnet's pool; deleting one gives the address back before the port record
//! is removed.

use crate::error::{ProviderError, Result};
use crate::keys::KeyBuilder;
use crate::models::{Port, PortRequest};
use crate::network::NetworkRegistry;
use crate::records::{load_records, save_record};
use crate::subnet::SubnetRegistry;
use kv_store::KvStore;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// First two octets of every derived MAC address (locally administered)
pub const MAC_PREFIX: [u8; 2] = [0x02, 0x42];

/// Derive a MAC address from an IPv4 address: `02:42` followed by its four octets
#[must_use]
pub fn mac_from_ipv4(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!(
        "{:02x}:{:02x}:{a:02x}:{b:02x}:{c:02x}:{d:02x}",
        MAC_PREFIX[0], MAC_PREFIX[1]
    )
}

/// Port registry
pub struct PortRegistry {
    store: Arc<dyn KvStore>,
    keys: KeyBuilder,
    ports: RwLock<HashMap<String, Port>>,
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry").finish_non_exhaustive()
    }
}

impl PortRegistry {
    /// Load every persisted port
    pub async fn load(store: Arc<dyn KvStore>, keys: KeyBuilder) -> Result<Self> {
        let records: Vec<Port> = load_records(store.as_ref(), &keys.ports_dir()).await?;
        info!("Loaded {} ports", records.len());

        let ports = records.into_iter().map(|p| (p.port_id.clone(), p)).collect();
        Ok(Self {
            store,
            keys,
            ports: RwLock::new(ports),
        })
    }

    /// Create a port.
    ///
    /// If the port record cannot be persisted, the address already drawn
    /// from the subnet stays allocated.
    pub async fn create_port(
        &self,
        networks: &NetworkRegistry,
        subnets: &SubnetRegistry,
        request: &PortRequest,
    ) -> Result<Port> {
        if !networks.exists(&request.network_id).await {
            return Err(ProviderError::NotFound(format!(
                "network {} not found",
                request.network_id
            )));
        }
        if !subnets.exists(&request.subnet_id).await {
            return Err(ProviderError::NotFound(format!(
                "subnet {} not found",
                request.subnet_id
            )));
        }

        let ip = subnets
            .alloc_ip(&request.subnet_id, request.requested_ip())
            .await?;
        let mac_address = match request.requested_mac() {
            Some(mac) => mac.to_string(),
            None => {
                let addr: Ipv4Addr = ip.parse().map_err(|_| {
                    ProviderError::Validation(format!("allocated address {ip} is not IPv4"))
                })?;
                mac_from_ipv4(addr)
            }
        };

        let port = Port {
            name: request.network_plane.clone(),
            port_id: Uuid::new_v4().to_string(),
            ip,
            mac_address,
            network_id: request.network_id.clone(),
            subnet_id: request.subnet_id.clone(),
        };
        save_record(self.store.as_ref(), &self.keys.port(&port.port_id), &port).await?;

        info!(
            "Created port {} ({}) ip {} mac {} vnic {} on subnet {}",
            port.port_id, port.name, port.ip, port.mac_address, request.vnic_type, port.subnet_id
        );
        self.ports
            .write()
            .await
            .insert(port.port_id.clone(), port.clone());
        Ok(port)
    }

    /// Create ports in order, all or nothing.
    ///
    /// On the first failure every port this call already created is deleted
    /// again and a `BulkCreate` error naming the failed request is returned.
    pub async fn create_bulk_ports(
        &self,
        networks: &NetworkRegistry,
        subnets: &SubnetRegistry,
        requests: &[PortRequest],
    ) -> Result<Vec<Port>> {
        let mut created = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            match self.create_port(networks, subnets, request).await {
                Ok(port) => created.push(port),
                Err(e) => {
                    warn!(
                        "Bulk port create failed at request {} of {}, rolling back {} ports: {}",
                        index,
                        requests.len(),
                        created.len(),
                        e
                    );
                    let rolled_back = self.roll_back(subnets, &created).await;
                    return Err(ProviderError::BulkCreate {
                        index,
                        rolled_back,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(created)
    }

    async fn roll_back(&self, subnets: &SubnetRegistry, created: &[Port]) -> usize {
        let mut deleted = 0;
        for port in created.iter().rev() {
            match self.delete_port(&port.port_id, subnets).await {
                Ok(()) => deleted += 1,
                Err(e) => error!("Failed to roll back port {}: {}", port.port_id, e),
            }
        }
        deleted
    }

    /// Port by identity
    pub async fn get_port(&self, id: &str) -> Result<Port> {
        self.ports
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("port {id} not found")))
    }

    /// Delete a port, freeing its address first
    pub async fn delete_port(&self, id: &str, subnets: &SubnetRegistry) -> Result<()> {
        let port = self.get_port(id).await?;

        subnets.free_ip(&port.subnet_id, &port.ip).await?;
        self.store.delete_leaf(&self.keys.port(id)).await?;
        self.ports.write().await.remove(id);

        info!("Deleted port {} ({}) ip {}", id, port.name, port.ip);
        Ok(())
    }

    /// Ports on a network, in unspecified order
    pub async fn list_ports(&self, network_id: &str) -> Vec<Port> {
        self.ports
            .read()
            .await
            .values()
            .filter(|p| p.network_id == network_id)
            .cloned()
            .collect()
    }

    /// Number of live ports referencing a subnet
    pub async fn count_in_subnet(&self, subnet_id: &str) -> usize {
        self.ports
            .read()
            .await
            .values()
            .filter(|p| p.subnet_id == subnet_id)
            .count()
    }

    /// Snapshot of all live ports, in unspecified order
    pub async fn list(&self) -> Vec<Port> {
        self.ports.read().await.values().cloned().collect()
    }

    /// Number of live ports
    pub async fn count(&self) -> usize {
        self.ports.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_from_ipv4() {
        assert_eq!(mac_from_ipv4(Ipv4Addr::new(192, 168, 1, 2)), "02:42:c0:a8:01:02");
        assert_eq!(mac_from_ipv4(Ipv4Addr::new(10, 0, 0, 255)), "02:42:0a:00:00:ff");
    }
}
