//! Subnet registry
//!
//! Owns subnets and the IPv4 address pool of each. Every subnet carries its
//! own pool lock, so allocations on different subnets never wait on each
//! other or on the registry-wide lock.

use crate::error::{ProviderError, Result};
use crate::ip_pool::{IpPool, Ipv4Block};
use crate::keys::KeyBuilder;
use crate::models::{AllocationPool, Subnet};
use crate::network::NetworkRegistry;
use crate::port::PortRegistry;
use crate::records::{load_records, save_record};
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tenant recorded on every embedded subnet
pub const TENANT_PLACEHOLDER: &str = "admin";

/// Persisted subnet shape: the subnet plus its address pool
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubnetRecord {
    subnet: Subnet,
    #[serde(default)]
    ip_used: BTreeMap<String, Option<String>>,
}

#[derive(Debug)]
struct SubnetEntry {
    subnet: Subnet,
    block: Ipv4Block,
    pool: Mutex<IpPool>,
    // Set by delete_subnet while holding the pool lock; read only under it
    deleted: AtomicBool,
}

impl SubnetEntry {
    fn new(subnet: Subnet, block: Ipv4Block, pool: IpPool) -> Self {
        Self {
            subnet,
            block,
            pool: Mutex::new(pool),
            deleted: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(ProviderError::NotFound(format!(
                "subnet {} not found",
                self.subnet.id
            )));
        }
        Ok(())
    }
}

/// Subnet registry
pub struct SubnetRegistry {
    store: Arc<dyn KvStore>,
    keys: KeyBuilder,
    subnets: RwLock<HashMap<String, Arc<SubnetEntry>>>,
}

impl std::fmt::Debug for SubnetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetRegistry").finish_non_exhaustive()
    }
}

impl SubnetRegistry {
    /// Load every persisted subnet together with its pool
    pub async fn load(store: Arc<dyn KvStore>, keys: KeyBuilder) -> Result<Self> {
        let records: Vec<SubnetRecord> = load_records(store.as_ref(), &keys.subnets_dir()).await?;

        let mut subnets = HashMap::with_capacity(records.len());
        for record in records {
            let block = match Ipv4Block::parse(&record.subnet.cidr) {
                Ok(block) => block,
                Err(e) => {
                    warn!("Skipping subnet {} with unusable CIDR: {}", record.subnet.id, e);
                    continue;
                }
            };
            let pool = IpPool::from_record(&record.ip_used);
            let entry = SubnetEntry::new(record.subnet, block, pool);
            subnets.insert(entry.subnet.id.clone(), Arc::new(entry));
        }
        info!("Loaded {} subnets", subnets.len());

        Ok(Self {
            store,
            keys,
            subnets: RwLock::new(subnets),
        })
    }

    /// Create a subnet on an existing network.
    ///
    /// The subnet is named after its network. `pools` is stored as given and
    /// does not constrain allocation.
    pub async fn create_subnet(
        &self,
        networks: &NetworkRegistry,
        network_id: &str,
        cidr: &str,
        gateway: &str,
        pools: Vec<AllocationPool>,
    ) -> Result<Subnet> {
        let block = Ipv4Block::parse(cidr)?;
        let network = networks.get_network(network_id).await?;

        let subnet = Subnet {
            id: Uuid::new_v4().to_string(),
            network_id: network.id,
            name: network.name,
            cidr: cidr.to_string(),
            gateway_ip: gateway.to_string(),
            tenant_id: TENANT_PLACEHOLDER.to_string(),
            allocation_pools: pools,
        };
        let entry = SubnetEntry::new(subnet, block, IpPool::new());

        self.persist(&entry, &IpPool::new()).await?;

        let subnet = entry.subnet.clone();
        info!(
            "Created subnet {} ({}) on network {}",
            subnet.id, subnet.cidr, subnet.network_id
        );
        self.subnets
            .write()
            .await
            .insert(subnet.id.clone(), Arc::new(entry));
        Ok(subnet)
    }

    /// Delete a subnet. Refused while any live port references it.
    ///
    /// The pool lock is held from the port check through the record delete,
    /// so an allocation already in flight finishes its write first and any
    /// later one on the same entry fails with NotFound.
    pub async fn delete_subnet(&self, id: &str, ports: &PortRegistry) -> Result<()> {
        let entry = self.entry(id).await?;
        let _pool = entry.pool.lock().await;
        entry.ensure_live()?;

        let in_use = ports.count_in_subnet(id).await;
        if in_use > 0 {
            return Err(ProviderError::Conflict(format!(
                "subnet {id} is still used by {in_use} ports"
            )));
        }

        self.store.delete_leaf(&self.keys.subnet(id)).await?;
        entry.deleted.store(true, Ordering::SeqCst);
        self.subnets.write().await.remove(id);

        info!("Deleted subnet {} ({})", id, entry.subnet.cidr);
        Ok(())
    }

    /// Subnet by identity
    pub async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        self.entry(id).await.map(|e| e.subnet.clone())
    }

    /// ID of a subnet bound to `network_id`; NotFound when there is none
    pub async fn get_subnet_id(&self, network_id: &str) -> Result<String> {
        self.find_by_network(network_id).await.ok_or_else(|| {
            ProviderError::NotFound(format!("no subnet on network {network_id}"))
        })
    }

    /// ID of the first subnet bound to `network_id`, in unspecified order
    pub async fn find_by_network(&self, network_id: &str) -> Option<String> {
        self.subnets
            .read()
            .await
            .values()
            .find(|e| e.subnet.network_id == network_id)
            .map(|e| e.subnet.id.clone())
    }

    /// True when the subnet is live
    pub async fn exists(&self, id: &str) -> bool {
        self.subnets.read().await.contains_key(id)
    }

    /// Snapshot of all live subnets, in unspecified order
    pub async fn list(&self) -> Vec<Subnet> {
        self.subnets
            .read()
            .await
            .values()
            .map(|e| e.subnet.clone())
            .collect()
    }

    /// Number of live subnets
    pub async fn count(&self) -> usize {
        self.subnets.read().await.len()
    }

    /// Allocated `(offset, address)` pairs of a subnet's pool
    pub async fn allocated_addresses(&self, id: &str) -> Result<Vec<(u32, Ipv4Addr)>> {
        let entry = self.entry(id).await?;
        let pool = entry.pool.lock().await;
        Ok(pool.allocated().collect())
    }

    /// Allocate an address in a subnet, optionally a specific one.
    ///
    /// The pool is written back to the store after the change. If that write
    /// fails the error is returned but the in-memory allocation stands.
    pub async fn alloc_ip(&self, subnet_id: &str, specific: Option<&str>) -> Result<String> {
        let entry = self.entry(subnet_id).await?;
        self.alloc_on(&entry, specific).await
    }

    /// Release an allocated address. A failed write restores the slot.
    pub async fn free_ip(&self, subnet_id: &str, ip: &str) -> Result<()> {
        let entry = self.entry(subnet_id).await?;
        self.free_on(&entry, ip).await
    }

    async fn alloc_on(&self, entry: &SubnetEntry, specific: Option<&str>) -> Result<String> {
        let mut pool = entry.pool.lock().await;
        entry.ensure_live()?;

        let ip = pool.allocate(&entry.block, specific)?;
        debug!("Allocated {} in subnet {}", ip, entry.subnet.id);

        if let Err(e) = self.persist(entry, &pool).await {
            warn!(
                "Allocated {} in subnet {} but failed to persist the pool: {}",
                ip, entry.subnet.id, e
            );
            return Err(e);
        }
        Ok(ip.to_string())
    }

    async fn free_on(&self, entry: &SubnetEntry, ip: &str) -> Result<()> {
        let mut pool = entry.pool.lock().await;
        entry.ensure_live()?;

        let (offset, previous) = pool.release(&entry.block, ip)?;
        if let Err(e) = self.persist(entry, &pool).await {
            pool.restore(offset, previous);
            warn!(
                "Failed to persist release of {} in subnet {}: {}",
                ip, entry.subnet.id, e
            );
            return Err(e);
        }

        debug!("Freed {} in subnet {}", ip, entry.subnet.id);
        Ok(())
    }

    async fn entry(&self, id: &str) -> Result<Arc<SubnetEntry>> {
        self.subnets
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("subnet {id} not found")))
    }

    async fn persist(&self, entry: &SubnetEntry, pool: &IpPool) -> Result<()> {
        let record = SubnetRecord {
            subnet: entry.subnet.clone(),
            ip_used: pool.to_record(),
        };
        save_record(self.store.as_ref(), &self.keys.subnet(&entry.subnet.id), &record).await
    }
}
