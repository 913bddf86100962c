//! Network Manager
//!
//! Runs the embedded network resource provider:
//! - Opens the configured store (file or memory)
//! - Loads the VXLAN set, networks, subnets and ports
//! - Audits the loaded state and logs any inconsistencies
//!
//! The provider is built once at startup and lives until a shutdown signal.

mod config;
mod error;

use crate::config::{Config, StoreBackend};
use crate::error::ManagerError;
use anyhow::{Context, Result};
use embedded_provider::{EmbeddedProvider, ResourceProvider};
use kv_store::{FileStore, KvStore, MemoryStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Network Manager");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration:");
    info!("  Provider: {}", config.provider_kind);
    info!("  Store: {}", config.store);
    info!("  Key prefix: {}", config.provider.key_prefix);
    info!("  Attach concurrency: {}", config.provider.attach_concurrency);

    config
        .provider_kind
        .ensure_built()
        .context("Failed to build provider")?;

    let store = open_store(&config.store)
        .await
        .context("Failed to open store")?;
    let provider = EmbeddedProvider::new(store, &config.provider)
        .await
        .context("Failed to load provider state")?;

    let findings = provider.audit().await;
    if findings.is_empty() {
        info!("Startup audit found no inconsistencies");
    } else {
        for finding in &findings {
            warn!("Audit: {}", finding);
        }
        warn!("Startup audit found {} inconsistencies", findings.len());
    }

    info!(
        "Network Manager ready ({} provider, attach concurrency {})",
        provider.kind(),
        provider.attach_concurrency()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down Network Manager");

    Ok(())
}

async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn KvStore>, ManagerError> {
    match backend {
        StoreBackend::File(dir) => {
            tokio::fs::create_dir_all(dir).await.map_err(kv_store::StoreError::from)?;
            Ok(Arc::new(FileStore::new(dir.clone())))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
