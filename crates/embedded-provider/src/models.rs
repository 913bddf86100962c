//! Provider models
//!
//! Public projections returned by the provider, plus the record shapes that
//! are written verbatim (as JSON) to the store.

use serde::{Deserialize, Serialize};

/// Overlay type tag carried by every embedded network
pub const NETWORK_TYPE_VXLAN: &str = "vxlan";

/// Physical-network label carried by every embedded network
pub const PHYSICAL_NETWORK: &str = "physnet1";

/// Network projection returned by create/get
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
}

/// Full network record, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NetworkAttrs {
    pub id: String,
    pub name: String,
    pub network_type: String,
    pub physical_network: String,
    pub segmentation_id: String, // VXLAN ID, decimal
}

impl NetworkAttrs {
    /// Public `{id, name}` projection
    #[must_use]
    pub fn to_network(&self) -> Network {
        Network {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Address range hint supplied at subnet creation. Stored, not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPool {
    pub start: String,
    pub end: String,
}

/// Subnet model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub name: String,
    pub cidr: String, // e.g., "192.168.1.0/24"
    pub gateway_ip: String,
    pub tenant_id: String,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
}

/// Port model, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Port {
    /// Network plane label supplied by the caller; not unique
    pub name: String,
    pub port_id: String,
    pub ip: String,
    pub mac_address: String,
    pub network_id: String,
    pub subnet_id: String,
}

/// Request body for creating a port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PortRequest {
    pub network_id: String,
    pub subnet_id: String,
    pub network_plane: String,
    pub ip: Option<String>,  // Optional: specific IP to allocate
    pub mac: Option<String>, // Optional: derived from the IP when absent
    pub vnic_type: String,
}

impl PortRequest {
    /// Requested IP, treating an empty string as "not supplied"
    #[must_use]
    pub fn requested_ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|s| !s.is_empty())
    }

    /// Requested MAC, treating an empty string as "not supplied"
    #[must_use]
    pub fn requested_mac(&self) -> Option<&str> {
        self.mac.as_deref().filter(|s| !s.is_empty())
    }
}

/// Router model. The embedded provider never produces one; the type exists so
/// the provider contract can be expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Router {
    pub id: String,
    pub name: String,
    pub ext_net_id: String,
}

/// Counts of live entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub networks: usize,
    pub subnets: usize,
    pub ports: usize,
    pub vxlan_ids: usize,
}
