//! ResourceProvider trait
//!
//! The contract every network resource provider fulfils, whether it manages
//! resources in-process or fronts a remote IaaS controller. Upper layers hold
//! an `Arc<dyn ResourceProvider>` and never need to know which one they got.

use crate::config::ProviderKind;
use crate::error::Result;
use crate::models::*;

/// Network resource provider operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Which provider this is
    fn kind(&self) -> ProviderKind;

    // Network Operations
    async fn create_network(&self, name: &str) -> Result<Network>;
    async fn delete_network(&self, id: &str) -> Result<()>;
    async fn get_network(&self, id: &str) -> Result<Network>;
    async fn get_network_id(&self, name: &str) -> Result<String>;
    async fn get_network_extended_attrs(&self, id: &str) -> Result<NetworkAttrs>;
    async fn create_provider_network(
        &self,
        name: &str,
        network_type: &str,
        physical_network: &str,
        segmentation_id: &str,
    ) -> Result<Network>;

    // Subnet Operations
    async fn create_subnet(
        &self,
        network_id: &str,
        cidr: &str,
        gateway: &str,
        pools: Vec<AllocationPool>,
    ) -> Result<Subnet>;
    async fn delete_subnet(&self, id: &str) -> Result<()>;
    async fn get_subnet(&self, id: &str) -> Result<Subnet>;
    async fn get_subnet_id(&self, network_id: &str) -> Result<String>;

    // Port Operations
    async fn create_port(&self, request: &PortRequest) -> Result<Port>;
    async fn create_bulk_ports(&self, requests: &[PortRequest]) -> Result<Vec<Port>>;
    async fn get_port(&self, id: &str) -> Result<Port>;
    async fn delete_port(&self, id: &str) -> Result<()>;
    async fn list_ports(&self, network_id: &str) -> Result<Vec<Port>>;

    /// Current limit on concurrent attach requests
    fn attach_concurrency(&self) -> usize;

    /// Change the limit on concurrent attach requests (must be at least 1)
    fn set_attach_concurrency(&self, limit: usize) -> Result<()>;

    // Router Operations
    async fn create_router(&self, name: &str, ext_net_id: &str) -> Result<String>;
    async fn update_router(&self, id: &str, name: &str, ext_net_id: &str) -> Result<()>;
    async fn get_router(&self, id: &str) -> Result<Router>;
    async fn delete_router(&self, id: &str) -> Result<()>;
    async fn attach_net_to_router(&self, router_id: &str, subnet_id: &str) -> Result<String>;
    async fn detach_net_from_router(&self, router_id: &str, network_id: &str) -> Result<String>;

    // VM Operations
    async fn attach_port_to_vm(&self, vm_id: &str, port_id: &str) -> Result<Port>;
    async fn detach_port_from_vm(&self, vm_id: &str, port_id: &str) -> Result<()>;
}
