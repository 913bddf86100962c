//! Provider configuration

use crate::error::{ProviderError, Result};
use crate::keys::DEFAULT_KEY_PREFIX;
use std::fmt;
use std::str::FromStr;

/// Default for the attach concurrency limit
pub const DEFAULT_ATTACH_CONCURRENCY: usize = 5;

/// Kind of resource provider, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// In-process provider backed by a key/value store
    #[default]
    Embedded,
    /// Remote OpenStack controller with Keystone authentication
    OpenStack,
    /// Remote OpenStack controller without authentication
    NoAuthOpenStack,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(ProviderKind::Embedded),
            "openstack" => Ok(ProviderKind::OpenStack),
            "noauth-openstack" | "noauth_openstack" => Ok(ProviderKind::NoAuthOpenStack),
            other => Err(ProviderError::InvalidConfig(format!(
                "unknown provider kind: {other}"
            ))),
        }
    }
}

impl ProviderKind {
    /// Check this kind has an implementation in this crate. Only
    /// `Embedded` does; the remote kinds fail with `InvalidConfig`.
    pub fn ensure_built(self) -> Result<()> {
        match self {
            ProviderKind::Embedded => Ok(()),
            ProviderKind::OpenStack | ProviderKind::NoAuthOpenStack => Err(
                ProviderError::InvalidConfig(format!("provider kind {self} is not available in this build")),
            ),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::Embedded => "embedded",
            ProviderKind::OpenStack => "openstack",
            ProviderKind::NoAuthOpenStack => "noauth-openstack",
        };
        f.write_str(s)
    }
}

/// Embedded provider settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Root of the persisted key namespace
    pub key_prefix: String,
    /// Initial attach concurrency limit (at least 1)
    pub attach_concurrency: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            attach_concurrency: DEFAULT_ATTACH_CONCURRENCY,
        }
    }
}

impl ProviderConfig {
    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.trim_matches('/').is_empty() {
            return Err(ProviderError::InvalidConfig(
                "key prefix must not be empty".to_string(),
            ));
        }
        if self.attach_concurrency == 0 {
            return Err(ProviderError::InvalidConfig(
                "attach concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
