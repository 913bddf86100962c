//! File-backed store
//!
//! Each leaf is one file under the root directory; directory keys are real
//! directories. Writes land in a sibling temp file first and are renamed
//! into place, so a crash never leaves a half-written record behind.

use crate::error::StoreError;
use crate::join_key;
use crate::store_trait::KvStore;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const TMP_SUFFIX: &str = ".tmp";

/// Directory-backed `KvStore`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Backend(format!("invalid key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(key: &str, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait::async_trait]
impl KvStore for FileStore {
    async fn save_leaf(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn read_leaf(&self, key: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| map_io(key, e))
    }

    async fn delete_leaf(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_io(key, e))
    }

    async fn read_dir(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let path = self.path_for(key)?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| map_io(key, e))?;

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            // Only files hold values; nested directories are not children
            if entry.file_type().await?.is_dir() {
                continue;
            }
            children.push(join_key(key, name));
        }
        children.sort();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.save_leaf("/a/../../etc/passwd", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "Unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.delete_leaf("/gone").await.unwrap_err().is_not_found());
    }
}
