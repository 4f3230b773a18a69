//! Local content-addressed object store.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

use super::{PersistenceError, StoredObject};

/// Writes objects under a root directory.
///
/// Paths are content addressed by the caller, so an existing file is never
/// rewritten.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of `path`, or the local file path if no base URL is set.
    pub fn public_url(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), path),
            None => self.root.join(path).display().to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, PersistenceError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(PersistenceError::Storage(format!(
                "refusing to store outside the store root: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    pub async fn put(&self, path: &str, bytes: &[u8]) -> Result<StoredObject, PersistenceError> {
        let target = self.resolve(path)?;
        let stored = StoredObject {
            path: path.to_string(),
            public_url: self.public_url(path),
        };

        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path, "Object already stored");
            return Ok(stored);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::Storage(format!("{}: {}", parent.display(), e)))?;
        }

        let tmp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| PersistenceError::Storage(format!("{}: {}", tmp.display(), e)))?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(PersistenceError::Storage(format!("{}: {}", target.display(), e)));
        }

        debug!(path, bytes = bytes.len(), "Stored object");
        Ok(stored)
    }
}
