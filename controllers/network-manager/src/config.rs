//! Environment configuration
//!
//! Every setting comes from an environment variable with a default. Parsing
//! goes through a lookup function so it can be exercised without touching
//! the process environment.

use crate::error::ManagerError;
use embedded_provider::config::DEFAULT_ATTACH_CONCURRENCY;
use embedded_provider::keys::DEFAULT_KEY_PREFIX;
use embedded_provider::{ProviderConfig, ProviderKind};
use std::fmt;
use std::path::PathBuf;

/// Default file store root
pub const DEFAULT_STORE_DIR: &str = "/var/lib/network-manager";

/// Where persisted state lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// One file per key under a root directory
    File(PathBuf),
    /// Process memory; nothing survives a restart
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::File(dir) => write!(f, "file ({})", dir.display()),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

/// Network manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub provider_kind: ProviderKind,
    pub store: StoreBackend,
    pub provider: ProviderConfig,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ManagerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value if set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ManagerError> {
        let provider_kind = match lookup("PROVIDER_KIND") {
            Some(raw) => raw.parse::<ProviderKind>()?,
            None => ProviderKind::default(),
        };

        let store = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("file") => StoreBackend::File(PathBuf::from(
                lookup("STORE_DIR").unwrap_or_else(|| DEFAULT_STORE_DIR.to_string()),
            )),
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ManagerError::InvalidConfig(format!(
                    "STORE_BACKEND must be file or memory, got {other}"
                )));
            }
        };

        let attach_concurrency = match lookup("ATTACH_CONCURRENCY") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                ManagerError::InvalidConfig(format!("ATTACH_CONCURRENCY {raw:?}: {e}"))
            })?,
            None => DEFAULT_ATTACH_CONCURRENCY,
        };

        let provider = ProviderConfig {
            key_prefix: lookup("KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            attach_concurrency,
        };
        provider.validate()?;

        Ok(Self {
            provider_kind,
            store,
            provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, ManagerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.provider_kind, ProviderKind::Embedded);
        assert_eq!(config.store, StoreBackend::File(PathBuf::from(DEFAULT_STORE_DIR)));
        assert_eq!(config.provider, ProviderConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            ("STORE_BACKEND", "memory"),
            ("KEY_PREFIX", "/lab/net"),
            ("ATTACH_CONCURRENCY", "8"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.provider.key_prefix, "/lab/net");
        assert_eq!(config.provider.attach_concurrency, 8);

        let config = parse(&[("STORE_DIR", "/tmp/nm")]).unwrap();
        assert_eq!(config.store, StoreBackend::File(PathBuf::from("/tmp/nm")));
    }

    #[test]
    fn test_remote_provider_kinds_parse() {
        let config = parse(&[("PROVIDER_KIND", "openstack")]).unwrap();
        assert_eq!(config.provider_kind, ProviderKind::OpenStack);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&[("PROVIDER_KIND", "vsphere")]).is_err());
        assert!(parse(&[("STORE_BACKEND", "etcd")]).is_err());
        assert!(parse(&[("ATTACH_CONCURRENCY", "many")]).is_err());
        assert!(parse(&[("ATTACH_CONCURRENCY", "0")]).is_err());
        assert!(parse(&[("KEY_PREFIX", "/")]).is_err());
    }
}
