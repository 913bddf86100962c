//! Consistency audit
//!
//! Cascading deletes and port creation span several registries without a
//! transaction, so a failure halfway can leave residue behind: a port whose
//! subnet is gone, an address held by no port, a VXLAN ID held by no
//! network. The audit finds and reports these. It never repairs anything.

use crate::embedded::EmbeddedProvider;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// One inconsistency between registries
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Finding {
    /// Port references a network that does not exist
    PortWithoutNetwork { port_id: String, network_id: String },
    /// Port references a subnet that does not exist
    PortWithoutSubnet { port_id: String, subnet_id: String },
    /// Port holds an address its subnet's pool does not record as allocated
    PortAddressNotAllocated { port_id: String, subnet_id: String, ip: String },
    /// Subnet references a network that does not exist
    SubnetWithoutNetwork { subnet_id: String, network_id: String },
    /// Network's segmentation ID is not in the allocated VXLAN set
    NetworkVxlanNotAllocated { network_id: String, segmentation_id: String },
    /// Allocated VXLAN ID that no network holds
    OrphanVxlanId { id: u32 },
    /// Allocated address that no port holds
    OrphanAddress { subnet_id: String, ip: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::PortWithoutNetwork { port_id, network_id } => {
                write!(f, "port {port_id} references missing network {network_id}")
            }
            Finding::PortWithoutSubnet { port_id, subnet_id } => {
                write!(f, "port {port_id} references missing subnet {subnet_id}")
            }
            Finding::PortAddressNotAllocated { port_id, subnet_id, ip } => write!(
                f,
                "port {port_id} holds {ip} which subnet {subnet_id} does not record as allocated"
            ),
            Finding::SubnetWithoutNetwork { subnet_id, network_id } => {
                write!(f, "subnet {subnet_id} references missing network {network_id}")
            }
            Finding::NetworkVxlanNotAllocated { network_id, segmentation_id } => write!(
                f,
                "network {network_id} holds VXLAN ID {segmentation_id} which is not allocated"
            ),
            Finding::OrphanVxlanId { id } => {
                write!(f, "VXLAN ID {id} is allocated but held by no network")
            }
            Finding::OrphanAddress { subnet_id, ip } => {
                write!(f, "address {ip} in subnet {subnet_id} is allocated but held by no port")
            }
        }
    }
}

impl EmbeddedProvider {
    /// Cross-check the registries and report every inconsistency, sorted
    pub async fn audit(&self) -> Vec<Finding> {
        let networks = self.networks.list().await;
        let subnets = self.subnets.list().await;
        let ports = self.ports.list().await;
        let vxlan_ids: BTreeSet<u32> = self.vxlan.allocated_ids().await.into_iter().collect();

        let network_ids: HashSet<&str> = networks.iter().map(|n| n.id.as_str()).collect();
        let mut findings = Vec::new();

        // Allocated addresses per subnet, as strings to compare with port records
        let mut allocated: HashMap<&str, HashSet<String>> = HashMap::new();
        for subnet in &subnets {
            if !network_ids.contains(subnet.network_id.as_str()) {
                findings.push(Finding::SubnetWithoutNetwork {
                    subnet_id: subnet.id.clone(),
                    network_id: subnet.network_id.clone(),
                });
            }
            // A subnet deleted since the listing has no pool left to check
            let addresses = self
                .subnets
                .allocated_addresses(&subnet.id)
                .await
                .unwrap_or_default();
            allocated.insert(
                subnet.id.as_str(),
                addresses.into_iter().map(|(_, ip)| ip.to_string()).collect(),
            );
        }

        let mut held: HashSet<(&str, &str)> = HashSet::new();
        for port in &ports {
            if !network_ids.contains(port.network_id.as_str()) {
                findings.push(Finding::PortWithoutNetwork {
                    port_id: port.port_id.clone(),
                    network_id: port.network_id.clone(),
                });
            }
            match allocated.get(port.subnet_id.as_str()) {
                None => findings.push(Finding::PortWithoutSubnet {
                    port_id: port.port_id.clone(),
                    subnet_id: port.subnet_id.clone(),
                }),
                Some(addresses) if !addresses.contains(&port.ip) => {
                    findings.push(Finding::PortAddressNotAllocated {
                        port_id: port.port_id.clone(),
                        subnet_id: port.subnet_id.clone(),
                        ip: port.ip.clone(),
                    });
                }
                Some(_) => {}
            }
            held.insert((port.subnet_id.as_str(), port.ip.as_str()));
        }

        for (subnet_id, addresses) in &allocated {
            for ip in addresses {
                if !held.contains(&(*subnet_id, ip.as_str())) {
                    findings.push(Finding::OrphanAddress {
                        subnet_id: (*subnet_id).to_string(),
                        ip: ip.clone(),
                    });
                }
            }
        }

        let mut held_vxlan = BTreeSet::new();
        for network in &networks {
            match network.segmentation_id.parse::<u32>() {
                Ok(id) if vxlan_ids.contains(&id) => {
                    held_vxlan.insert(id);
                }
                _ => findings.push(Finding::NetworkVxlanNotAllocated {
                    network_id: network.id.clone(),
                    segmentation_id: network.segmentation_id.clone(),
                }),
            }
        }
        findings.extend(
            vxlan_ids
                .difference(&held_vxlan)
                .map(|id| Finding::OrphanVxlanId { id: *id }),
        );

        findings.sort();
        debug!("Audit produced {} findings", findings.len());
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::models::PortRequest;
    use crate::provider_trait::ResourceProvider;
    use kv_store::{MemoryStore, StoreOp};
    use std::sync::Arc;

    async fn provider(store: &MemoryStore) -> EmbeddedProvider {
        EmbeddedProvider::new(Arc::new(store.clone()), &ProviderConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_consistent_state_has_no_findings() {
        let store = MemoryStore::new();
        let p = provider(&store).await;
        let net = p.create_network("net1").await.unwrap();
        let subnet = p
            .create_subnet(&net.id, "10.0.0.0/24", "10.0.0.1", vec![])
            .await
            .unwrap();
        p.create_port(&PortRequest {
            network_id: net.id.clone(),
            subnet_id: subnet.id.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert!(p.audit().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_pool_write_leaves_orphan_address() {
        let store = MemoryStore::new();
        let p = provider(&store).await;
        let net = p.create_network("net1").await.unwrap();
        let subnet = p
            .create_subnet(&net.id, "10.0.0.0/24", "10.0.0.1", vec![])
            .await
            .unwrap();

        store.fail_next(StoreOp::Save, 1);
        let err = p
            .create_port(&PortRequest {
                network_id: net.id.clone(),
                subnet_id: subnet.id.clone(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ProviderError::Persistence(_)));

        let findings = p.audit().await;
        assert_eq!(
            findings,
            vec![Finding::OrphanAddress {
                subnet_id: subnet.id.clone(),
                ip: "10.0.0.2".to_string(),
            }]
        );
        assert!(findings[0].to_string().contains("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_failed_record_delete_leaves_network_without_vxlan() {
        let store = MemoryStore::new();
        let p = provider(&store).await;
        let net = p.create_network("net1").await.unwrap();
        let segmentation_id = p
            .get_network_extended_attrs(&net.id)
            .await
            .unwrap()
            .segmentation_id;

        store.fail_next(StoreOp::Delete, 1);
        assert!(p.delete_network(&net.id).await.is_err());

        // The VXLAN ID was freed before the record delete failed
        assert_eq!(
            p.audit().await,
            vec![Finding::NetworkVxlanNotAllocated {
                network_id: net.id.clone(),
                segmentation_id,
            }]
        );
    }
}
