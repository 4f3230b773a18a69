//! Mock persistence for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::persistence::{
    AssetPayload, Persistence, PersistenceError, RecordPayload, SourceLinkPayload, StoredObject,
};
use crate::slug::slugify;

/// Which operation an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceOp {
    UploadBytes,
    UpsertRecord,
    UpsertAsset,
    UpsertSourceLink,
}

#[derive(Debug, Default)]
struct State {
    parents: HashMap<String, i64>,
    records: HashMap<(i64, String), (i64, RecordPayload)>,
    assets: HashMap<(i64, String), (i64, AssetPayload)>,
    source_links: HashMap<(String, String), SourceLinkPayload>,
    objects: HashMap<String, Vec<u8>>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mock implementation of the Persistence trait.
///
/// Keeps rows in memory with the same natural keys and conflict rules as the
/// SQLite adapter. Failures can be injected per operation.
#[derive(Debug, Default)]
pub struct MockPersistence {
    state: Arc<RwLock<State>>,
    failures: Arc<RwLock<HashMap<PersistenceOp, String>>>,
    already_exists: Arc<RwLock<HashSet<PersistenceOp>>>,
}

impl MockPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `(source, native_id)` was stored by an earlier run.
    pub async fn seed_source_link(&self, source: &str, native_id: &str) {
        let mut state = self.state.write().await;
        state.source_links.insert(
            (source.to_string(), native_id.to_string()),
            SourceLinkPayload {
                source: source.to_string(),
                native_id: native_id.to_string(),
                record_id: 0,
                source_url: None,
            },
        );
    }

    /// Make `op` fail with a database error until cleared.
    pub async fn fail(&self, op: PersistenceOp, message: &str) {
        self.failures.write().await.insert(op, message.to_string());
    }

    /// Make `op` fail with an already-exists conflict until cleared.
    pub async fn conflict(&self, op: PersistenceOp) {
        self.already_exists.write().await.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
        self.already_exists.write().await.clear();
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn asset_count(&self) -> usize {
        self.state.read().await.assets.len()
    }

    pub async fn source_link_count(&self) -> usize {
        self.state.read().await.source_links.len()
    }

    /// Stored assets, in no particular order.
    pub async fn assets(&self) -> Vec<AssetPayload> {
        self.state
            .read()
            .await
            .assets
            .values()
            .map(|(_, asset)| asset.clone())
            .collect()
    }

    /// Bytes uploaded at `path`.
    pub async fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.read().await.objects.get(path).cloned()
    }

    async fn check(&self, op: PersistenceOp) -> Result<(), PersistenceError> {
        if self.already_exists.read().await.contains(&op) {
            return Err(PersistenceError::AlreadyExists(format!("{:?}", op)));
        }
        if let Some(message) = self.failures.read().await.get(&op) {
            return Err(PersistenceError::Database(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MockPersistence {
    async fn source_link_exists(&self, source: &str, native_id: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .state
            .read()
            .await
            .source_links
            .contains_key(&(source.to_string(), native_id.to_string())))
    }

    async fn linked_ids(&self, source: &str) -> Result<HashSet<String>, PersistenceError> {
        Ok(self
            .state
            .read()
            .await
            .source_links
            .keys()
            .filter(|(s, _)| s == source)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn ensure_parent_entity(&self, name: &str) -> Result<i64, PersistenceError> {
        let mut state = self.state.write().await;
        let slug = slugify(name);
        if let Some(id) = state.parents.get(&slug) {
            return Ok(*id);
        }
        let id = state.next_id();
        state.parents.insert(slug, id);
        Ok(id)
    }

    async fn upsert_record(&self, payload: &RecordPayload) -> Result<i64, PersistenceError> {
        self.check(PersistenceOp::UpsertRecord).await?;
        let mut state = self.state.write().await;
        let key = (payload.parent_id, payload.natural_key.clone());
        let id = match state.records.get(&key) {
            Some((id, _)) => *id,
            None => state.next_id(),
        };
        state.records.insert(key, (id, payload.clone()));
        Ok(id)
    }

    async fn upsert_asset(&self, payload: &AssetPayload) -> Result<i64, PersistenceError> {
        self.check(PersistenceOp::UpsertAsset).await?;
        let mut state = self.state.write().await;

        let duplicate = state.assets.values().any(|(_, existing)| {
            existing.content_hash == payload.content_hash && existing.record_id != payload.record_id
        });
        if duplicate {
            return Err(PersistenceError::AlreadyExists(payload.content_hash.clone()));
        }

        let key = (payload.record_id, payload.storage_path.clone());
        let id = match state.assets.get(&key) {
            Some((id, _)) => *id,
            None => state.next_id(),
        };
        state.assets.insert(key, (id, payload.clone()));
        Ok(id)
    }

    async fn upsert_source_link(&self, payload: &SourceLinkPayload) -> Result<(), PersistenceError> {
        self.check(PersistenceOp::UpsertSourceLink).await?;
        self.state.write().await.source_links.insert(
            (payload.source.clone(), payload.native_id.clone()),
            payload.clone(),
        );
        Ok(())
    }

    async fn upload_bytes(&self, path: &str, bytes: &[u8], _mime: &str) -> Result<StoredObject, PersistenceError> {
        self.check(PersistenceOp::UploadBytes).await?;
        self.state
            .write()
            .await
            .objects
            .entry(path.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(StoredObject {
            path: path.to_string(),
            public_url: format!("mock://{}", path),
        })
    }
}
