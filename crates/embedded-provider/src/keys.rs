//! Store key naming
//!
//! One namespace per entity kind under a configurable root:
//! `<root>/networks/<id>`, `<root>/subnets/<id>`, `<root>/ports/<id>`,
//! and a single `<root>/vxlan` leaf for the allocated VXLAN set.

use kv_store::join_key;

/// Default key root
pub const DEFAULT_KEY_PREFIX: &str = "/network-manager/embedded";

/// Builds the keys records are persisted under
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    root: String,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyBuilder {
    /// Create a key builder rooted at `root`
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        let root = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self { root }
    }

    pub fn networks_dir(&self) -> String {
        join_key(&self.root, "networks")
    }

    pub fn network(&self, id: &str) -> String {
        join_key(&self.networks_dir(), id)
    }

    pub fn subnets_dir(&self) -> String {
        join_key(&self.root, "subnets")
    }

    pub fn subnet(&self, id: &str) -> String {
        join_key(&self.subnets_dir(), id)
    }

    pub fn ports_dir(&self) -> String {
        join_key(&self.root, "ports")
    }

    pub fn port(&self, id: &str) -> String {
        join_key(&self.ports_dir(), id)
    }

    pub fn vxlan(&self) -> String {
        join_key(&self.root, "vxlan")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_per_kind() {
        let keys = KeyBuilder::new("provider/");
        assert_eq!(keys.network("n1"), "/provider/networks/n1");
        assert_eq!(keys.subnet("s1"), "/provider/subnets/s1");
        assert_eq!(keys.port("p1"), "/provider/ports/p1");
        assert_eq!(keys.vxlan(), "/provider/vxlan");
    }
}
