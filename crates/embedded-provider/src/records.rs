//! Record persistence helpers shared by the registries

use crate::error::Result;
use kv_store::KvStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Serialize `record` as JSON and save it under `key`
pub(crate) async fn save_record<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    record: &T,
) -> Result<()> {
    let raw = serde_json::to_string(record)?;
    store.save_leaf(key, &raw).await?;
    Ok(())
}

/// Load every record directly under `dir`.
///
/// A missing directory loads as empty. A child that vanished between listing
/// and reading, or that fails to decode, is skipped with a warning.
pub(crate) async fn load_records<T: DeserializeOwned>(
    store: &dyn KvStore,
    dir: &str,
) -> Result<Vec<T>> {
    let children = match store.read_dir(dir).await {
        Ok(children) => children,
        Err(e) if e.is_not_found() => {
            debug!("No records under {}", dir);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::with_capacity(children.len());
    for key in children {
        let raw = match store.read_leaf(&key).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping undecodable record {}: {}", key, e),
        }
    }
    Ok(records)
}
