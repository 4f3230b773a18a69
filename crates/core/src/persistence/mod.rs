//! Persistence port for ingested records and its SQLite-backed adapter.

mod sqlite;
mod store;

pub use sqlite::{PersistenceCounts, SqlitePersistence};
pub use store::LocalObjectStore;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slug::slugify;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A uniqueness constraint rejected the write. Callers treat this as a
    /// skip, not an error.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Canonical record row. Natural key: `(parent_id, natural_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub parent_id: i64,
    /// Stable identity within the parent, see `SourceRecord::record_key`.
    pub natural_key: String,
    pub slug: String,
    pub title: String,
    pub canonical_ref: Option<String>,
}

/// Stored asset row. Natural key: `(record_id, storage_path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub record_id: i64,
    pub storage_path: String,
    pub public_url: String,
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    pub file_size_bytes: u64,
    pub mime: String,
}

/// Link from an upstream identifier to a stored record. Natural key:
/// `(source, native_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLinkPayload {
    pub source: String,
    pub native_id: String,
    pub record_id: i64,
    pub source_url: Option<String>,
}

/// Where uploaded bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

/// Idempotent writes the ingestion pipeline needs.
///
/// Every operation is an upsert on a natural key so that re-running a record
/// after a crash converges on the same rows.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Whether `(source, native_id)` is already linked to a stored record.
    async fn source_link_exists(&self, source: &str, native_id: &str) -> Result<bool, PersistenceError>;

    /// Every native id of `source` that is linked to a stored record.
    async fn linked_ids(&self, source: &str) -> Result<HashSet<String>, PersistenceError>;

    /// Id of the parent entity named `name`, creating it if needed.
    async fn ensure_parent_entity(&self, name: &str) -> Result<i64, PersistenceError>;

    async fn upsert_record(&self, payload: &RecordPayload) -> Result<i64, PersistenceError>;

    /// Fails with [`PersistenceError::AlreadyExists`] when the same content
    /// hash is already stored for a different record.
    async fn upsert_asset(&self, payload: &AssetPayload) -> Result<i64, PersistenceError>;

    async fn upsert_source_link(&self, payload: &SourceLinkPayload) -> Result<(), PersistenceError>;

    /// Store `bytes` at `path`. Writing an existing path is a no-op.
    async fn upload_bytes(&self, path: &str, bytes: &[u8], mime: &str) -> Result<StoredObject, PersistenceError>;
}

/// Content-addressed storage path: `<parent-slug>/<sha256>.<ext>`.
pub fn storage_path(parent_name: &str, content_hash: &str, extension: &str) -> String {
    format!("{}/{}.{}", slugify(parent_name), content_hash, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path() {
        assert_eq!(
            storage_path("Claude Monet", "abc123", "jpg"),
            "claude-monet/abc123.jpg"
        );
    }
}
