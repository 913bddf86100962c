//! VXLAN segment-ID allocator
//!
//! Hands out overlay segment IDs from `[VXLAN_ID_START, VXLAN_ID_END)`. The
//! whole allocated set is one store record, rewritten on every change, and a
//! single mutex serializes every operation including the write.

use crate::error::{ProviderError, Result};
use crate::keys::KeyBuilder;
use kv_store::KvStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// First allocatable VXLAN ID
pub const VXLAN_ID_START: u32 = 5000;

/// One past the last allocatable VXLAN ID
pub const VXLAN_ID_END: u32 = 15000;

/// VXLAN ID allocator
pub struct VxlanAllocator {
    store: Arc<dyn KvStore>,
    key: String,
    start: u32,
    end: u32,
    allocated: Mutex<BTreeSet<u32>>,
}

impl std::fmt::Debug for VxlanAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VxlanAllocator")
            .field("key", &self.key)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl VxlanAllocator {
    /// Load the allocated set from the store, using the default range
    pub async fn load(store: Arc<dyn KvStore>, keys: &KeyBuilder) -> Result<Self> {
        Self::load_with_range(store, keys, VXLAN_ID_START, VXLAN_ID_END).await
    }

    /// Load the allocated set from the store, allocating from `[start, end)`
    pub async fn load_with_range(
        store: Arc<dyn KvStore>,
        keys: &KeyBuilder,
        start: u32,
        end: u32,
    ) -> Result<Self> {
        if start >= end {
            return Err(ProviderError::InvalidConfig(format!(
                "empty VXLAN range [{start}, {end})"
            )));
        }
        let key = keys.vxlan();

        let allocated = match store.read_leaf(&key).await {
            Ok(raw) => decode_set(&raw)?,
            Err(e) if e.is_not_found() => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        info!("Loaded {} allocated VXLAN IDs from {}", allocated.len(), key);

        Ok(Self {
            store,
            key,
            start,
            end,
            allocated: Mutex::new(allocated),
        })
    }

    /// Reserve the lowest free ID and return it in decimal form.
    ///
    /// A failed write un-reserves the candidate and the scan moves on to the
    /// next ID; only running off the end of the range is an error.
    pub async fn alloc(&self) -> Result<String> {
        let mut allocated = self.allocated.lock().await;

        for id in self.start..self.end {
            if allocated.contains(&id) {
                continue;
            }
            allocated.insert(id);
            match self.persist(&allocated).await {
                Ok(()) => {
                    info!("Allocated VXLAN ID {}", id);
                    return Ok(id.to_string());
                }
                Err(e) => {
                    allocated.remove(&id);
                    warn!("Failed to persist VXLAN ID {}, trying next: {}", id, e);
                }
            }
        }

        Err(ProviderError::ResourceExhausted(format!(
            "no free VXLAN ID in [{}, {})",
            self.start, self.end
        )))
    }

    /// Release an ID. A failed write puts the ID back and returns the error.
    pub async fn free(&self, id: &str) -> Result<()> {
        let vni: u32 = id
            .parse()
            .map_err(|_| ProviderError::Validation(format!("invalid VXLAN ID: {id}")))?;

        let mut allocated = self.allocated.lock().await;
        let was_allocated = allocated.remove(&vni);
        if !was_allocated {
            debug!("VXLAN ID {} was not allocated", vni);
        }

        if let Err(e) = self.persist(&allocated).await {
            if was_allocated {
                allocated.insert(vni);
            }
            warn!("Failed to persist release of VXLAN ID {}: {}", vni, e);
            return Err(e);
        }

        info!("Freed VXLAN ID {}", vni);
        Ok(())
    }

    /// True when `id` is currently allocated
    pub async fn is_allocated(&self, id: u32) -> bool {
        self.allocated.lock().await.contains(&id)
    }

    /// Snapshot of the allocated IDs, ascending
    pub async fn allocated_ids(&self) -> Vec<u32> {
        self.allocated.lock().await.iter().copied().collect()
    }

    async fn persist(&self, allocated: &BTreeSet<u32>) -> Result<()> {
        let record: BTreeMap<String, bool> =
            allocated.iter().map(|id| (id.to_string(), true)).collect();
        let raw = serde_json::to_string(&record)?;
        self.store.save_leaf(&self.key, &raw).await?;
        Ok(())
    }
}

fn decode_set(raw: &str) -> Result<BTreeSet<u32>> {
    let record: BTreeMap<String, bool> = serde_json::from_str(raw)?;
    let mut set = BTreeSet::new();
    for (id, allocated) in record {
        if !allocated {
            continue;
        }
        match id.parse::<u32>() {
            Ok(id) => {
                set.insert(id);
            }
            Err(_) => warn!("Ignoring malformed VXLAN ID {:?} in store", id),
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::{MemoryStore, StoreOp};

    async fn allocator(store: &MemoryStore) -> VxlanAllocator {
        VxlanAllocator::load(Arc::new(store.clone()), &KeyBuilder::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_alloc_starts_at_range_start() {
        let store = MemoryStore::new();
        let vxlan = allocator(&store).await;

        assert_eq!(vxlan.alloc().await.unwrap(), "5000");
        assert_eq!(vxlan.alloc().await.unwrap(), "5001");
        assert_eq!(
            store.leaf(&KeyBuilder::default().vxlan()).as_deref(),
            Some(r#"{"5000":true,"5001":true}"#)
        );
    }

    #[tokio::test]
    async fn test_alloc_reuses_freed_id() {
        let store = MemoryStore::new();
        let vxlan = allocator(&store).await;

        let first = vxlan.alloc().await.unwrap();
        let _second = vxlan.alloc().await.unwrap();
        vxlan.free(&first).await.unwrap();

        assert_eq!(vxlan.alloc().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_alloc_skips_id_whose_write_failed() {
        let store = MemoryStore::new();
        let vxlan = allocator(&store).await;

        store.fail_next(StoreOp::Save, 1);
        // 5000 is rolled back after the failed write; the scan continues at 5001
        assert_eq!(vxlan.alloc().await.unwrap(), "5001");
        assert!(!vxlan.is_allocated(5000).await);
        assert_eq!(vxlan.allocated_ids().await, vec![5001]);
    }

    #[tokio::test]
    async fn test_alloc_exhausted_range() {
        let store = MemoryStore::new();
        let vxlan = VxlanAllocator::load_with_range(
            Arc::new(store.clone()),
            &KeyBuilder::default(),
            100,
            103,
        )
        .await
        .unwrap();

        for expected in ["100", "101", "102"] {
            assert_eq!(vxlan.alloc().await.unwrap(), expected);
        }
        let err = vxlan.alloc().await.unwrap_err();
        assert!(
            matches!(err, ProviderError::ResourceExhausted(_)),
            "Expected ResourceExhausted, got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_free_restores_id_when_write_fails() {
        let store = MemoryStore::new();
        let vxlan = allocator(&store).await;
        let id = vxlan.alloc().await.unwrap();

        store.fail_next(StoreOp::Save, 1);
        assert!(vxlan.free(&id).await.is_err());
        assert!(vxlan.is_allocated(5000).await, "Free must roll back on write failure");
    }

    #[tokio::test]
    async fn test_free_rejects_non_numeric_id() {
        let store = MemoryStore::new();
        let vxlan = allocator(&store).await;
        assert!(matches!(
            vxlan.free("abc").await,
            Err(ProviderError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_sees_allocated_ids() {
        let store = MemoryStore::new();
        {
            let vxlan = allocator(&store).await;
            vxlan.alloc().await.unwrap();
            vxlan.alloc().await.unwrap();
        }

        let reloaded = allocator(&store).await;
        assert_eq!(reloaded.allocated_ids().await, vec![5000, 5001]);
        assert_eq!(reloaded.alloc().await.unwrap(), "5002");
    }

    #[test]
    fn test_decode_ignores_false_and_malformed_entries() {
        let set = decode_set(r#"{"5000":true,"5001":false,"x":true}"#).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![5000]);
    }
}
