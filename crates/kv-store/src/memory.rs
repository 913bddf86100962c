//! In-memory store
//!
//! Keeps every leaf in one ordered map. Cloning a `MemoryStore` yields another
//! handle to the same map, which is how tests simulate a process restart:
//! build fresh registries over a clone and they reload what the first set wrote.

use crate::error::StoreError;
use crate::store_trait::KvStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Store operation, used to target failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `save_leaf`
    Save,
    /// `read_leaf`
    Read,
    /// `delete_leaf`
    Delete,
    /// `read_dir`
    ReadDir,
}

/// In-memory `KvStore`
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    leaves: Arc<Mutex<BTreeMap<String, String>>>,
    // Remaining injected failures per operation
    failures: Arc<Mutex<HashMap<StoreOp, usize>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls of `op` fail with `StoreError::Backend`
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        lock(&self.failures).insert(op, count);
    }

    /// Current value of a leaf, bypassing failure injection (for test assertions)
    #[must_use]
    pub fn leaf(&self, key: &str) -> Option<String> {
        lock(&self.leaves).get(key).cloned()
    }

    /// Number of stored leaves
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.leaves).len()
    }

    /// True when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.leaves).is_empty()
    }

    fn check_failure(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        let mut failures = lock(&self.failures);
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                debug!("Injected {:?} failure for {}", op, key);
                Err(StoreError::Backend(format!("injected {op:?} failure for {key}")))
            }
            _ => Ok(()),
        }
    }
}

// A panic while holding the lock cannot leave the map half-written, so a
// poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn save_leaf(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_failure(StoreOp::Save, key)?;
        lock(&self.leaves).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn read_leaf(&self, key: &str) -> Result<String, StoreError> {
        self.check_failure(StoreOp::Read, key)?;
        lock(&self.leaves)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete_leaf(&self, key: &str) -> Result<(), StoreError> {
        self.check_failure(StoreOp::Delete, key)?;
        lock(&self.leaves)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn read_dir(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_failure(StoreOp::ReadDir, key)?;
        let dir = key.trim_end_matches('/');
        let prefix = format!("{dir}/");

        let leaves = lock(&self.leaves);
        let children: BTreeSet<String> = leaves
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                let child = rest.split('/').next()?;
                (!child.is_empty()).then(|| format!("{prefix}{child}"))
            })
            .collect();

        if children.is_empty() {
            return Err(StoreError::NotFound(dir.to_string()));
        }
        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_leaf_is_not_found() {
        let store = MemoryStore::new();
        let err = store.read_leaf("/x/y").await.unwrap_err();
        assert!(err.is_not_found(), "Expected NotFound, got {err:?}");
    }

    #[tokio::test]
    async fn test_read_dir_lists_immediate_children_only() {
        let store = MemoryStore::new();
        store.save_leaf("/root/ports/p1", "1").await.unwrap();
        store.save_leaf("/root/ports/p2", "2").await.unwrap();
        store.save_leaf("/root/ports/nested/p3", "3").await.unwrap();
        store.save_leaf("/root/portsx/p4", "4").await.unwrap();

        let children = store.read_dir("/root/ports").await.unwrap();
        assert_eq!(
            children,
            vec![
                "/root/ports/nested".to_string(),
                "/root/ports/p1".to_string(),
                "/root/ports/p2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_dir_missing_directory() {
        let store = MemoryStore::new();
        assert!(store.read_dir("/nothing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Save, 2);

        assert!(store.save_leaf("/k", "v").await.is_err());
        assert!(store.save_leaf("/k", "v").await.is_err());
        assert!(store.save_leaf("/k", "v").await.is_ok());
        assert_eq!(store.leaf("/k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save_leaf("/shared", "yes").await.unwrap();
        assert_eq!(other.read_leaf("/shared").await.unwrap(), "yes");

        other.delete_leaf("/shared").await.unwrap();
        assert!(store.is_empty());
    }
}
