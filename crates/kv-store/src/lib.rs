//! Hierarchical Key/Value Store
//!
//! The persistence contract used by the embedded network provider, plus two
//! backends that implement it.
//!
//! Keys are path-style strings (`/root/networks/<id>`). A key names either a
//! single stored value (a *leaf*) or a namespace of child keys (a *directory*).
//!
//! # Example
//!
//! ```no_run
//! use kv_store::{KvStore, MemoryStore};
//!
//! # async fn example() -> Result<(), kv_store::StoreError> {
//! let store = MemoryStore::new();
//! store.save_leaf("/demo/networks/n1", r#"{"id":"n1"}"#).await?;
//!
//! let children = store.read_dir("/demo/networks").await?;
//! assert_eq!(children, vec!["/demo/networks/n1".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! - **MemoryStore**: process-local map, cloneable handle, failure injection for tests
//! - **FileStore**: one file per leaf under a root directory

pub mod error;
pub mod file;
pub mod memory;
#[path = "trait.rs"]
pub mod store_trait;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::{MemoryStore, StoreOp};
pub use store_trait::KvStore;

/// Join a directory key and a child name into a child key.
#[must_use]
pub fn join_key(dir: &str, child: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), child.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key_trims_separators() {
        assert_eq!(join_key("/a/b/", "/c"), "/a/b/c");
        assert_eq!(join_key("/a/b", "c"), "/a/b/c");
    }
}
