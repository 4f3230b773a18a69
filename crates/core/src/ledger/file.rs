//! One JSON file per scope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{entity_key, FailureLedger, FailureRecord, LedgerError};
use crate::slug::slugify;

/// File-backed ledger.
///
/// Each scope lives in `<dir>/<scope-key>.json` as a JSON array of
/// [`FailureRecord`], safe to inspect or hand-edit between runs. Writes to one
/// scope are serialized by a per-scope lock and replace the whole file via a
/// temp file and rename; different scopes never contend.
pub struct FileFailureLedger {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileFailureLedger {
    /// Open a ledger directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `scope`.
    pub fn scope_path(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slugify(scope)))
    }

    async fn lock_for(&self, scope: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(slugify(scope)).or_default())
    }

    async fn read_file(path: &Path) -> Result<Vec<FailureRecord>, LedgerError> {
        let contents = match fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&contents).map_err(|e| LedgerError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Replace the scope file with `records`, or delete it when empty.
    async fn write_file(path: &Path, records: &[FailureRecord]) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        if records.is_empty() {
            return match fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_err(e)),
            };
        }

        let json = serde_json::to_vec_pretty(records).map_err(|e| LedgerError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, &json).await.map_err(io_err)?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[async_trait]
impl FailureLedger for FileFailureLedger {
    async fn record(&self, scope: &str, title: &str, error: &str) -> Result<FailureRecord, LedgerError> {
        let lock = self.lock_for(scope).await;
        let _guard = lock.lock().await;

        let path = self.scope_path(scope);
        let mut records = Self::read_file(&path).await?;
        let key = entity_key(scope, title);
        let now = Utc::now();

        let record = match records.iter_mut().find(|r| r.entity_key == key) {
            Some(existing) => {
                existing.last_error = error.to_string();
                existing.last_attempt_at = now;
                existing.retry_count += 1;
                existing.clone()
            }
            None => {
                let record = FailureRecord {
                    entity_key: key,
                    scope: scope.to_string(),
                    display_title: title.to_string(),
                    last_error: error.to_string(),
                    first_seen_at: now,
                    last_attempt_at: now,
                    retry_count: 0,
                };
                records.push(record.clone());
                record
            }
        };

        Self::write_file(&path, &records).await?;
        debug!(
            scope,
            title,
            retry_count = record.retry_count,
            "Recorded failure"
        );
        Ok(record)
    }

    async fn list(&self, scope: &str) -> Result<Vec<FailureRecord>, LedgerError> {
        let lock = self.lock_for(scope).await;
        let _guard = lock.lock().await;
        Self::read_file(&self.scope_path(scope)).await
    }

    async fn remove(&self, scope: &str, title: &str) -> Result<bool, LedgerError> {
        let lock = self.lock_for(scope).await;
        let _guard = lock.lock().await;

        let path = self.scope_path(scope);
        let mut records = Self::read_file(&path).await?;
        let key = entity_key(scope, title);
        let before = records.len();
        records.retain(|r| r.entity_key != key);

        if records.len() == before {
            return Ok(false);
        }
        Self::write_file(&path, &records).await?;
        debug!(scope, title, "Cleared failure");
        Ok(true)
    }

    async fn list_scopes(&self) -> Result<Vec<String>, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut scopes = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(records) => {
                    if let Some(first) = records.first() {
                        scopes.push(first.scope.clone());
                    }
                }
                Err(e) => warn!(error = %e, "Skipping unreadable ledger file"),
            }
        }

        scopes.sort();
        scopes.dedup();
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger() -> (FileFailureLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = FileFailureLedger::open(dir.path().join("failures")).unwrap();
        (ledger, dir)
    }

    #[tokio::test]
    async fn test_record_then_list() {
        let (ledger, _dir) = ledger();
        let record = ledger
            .record("Claude Monet", "Water Lilies", "HTTP 503")
            .await
            .unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.entity_key, "claude-monet::water-lilies");

        let listed = ledger.list("Claude Monet").await.unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn test_repeat_failure_increments_and_replaces() {
        let (ledger, _dir) = ledger();
        ledger.record("Monet", "Haystacks", "first").await.unwrap();
        let second = ledger.record("Monet", "Haystacks", "second").await.unwrap();

        assert_eq!(second.retry_count, 1);
        assert_eq!(second.last_error, "second");
        assert!(second.last_attempt_at >= second.first_seen_at);

        let listed = ledger.list("Monet").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_error, "second");
    }

    #[tokio::test]
    async fn test_record_then_remove_leaves_nothing() {
        let (ledger, _dir) = ledger();
        ledger.record("Monet", "Haystacks", "boom").await.unwrap();

        assert!(ledger.remove("Monet", "Haystacks").await.unwrap());
        assert!(ledger.list("Monet").await.unwrap().is_empty());
        assert!(!ledger.scope_path("Monet").exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (ledger, _dir) = ledger();
        assert!(!ledger.remove("Nobody", "Nothing").await.unwrap());

        ledger.record("Monet", "Haystacks", "boom").await.unwrap();
        assert!(ledger.remove("Monet", "Haystacks").await.unwrap());
        assert!(!ledger.remove("Monet", "Haystacks").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_scope_lists_empty() {
        let (ledger, _dir) = ledger();
        assert!(ledger.list("Never Seen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_scopes() {
        let (ledger, _dir) = ledger();
        ledger.record("Vincent van Gogh", "Irises", "x").await.unwrap();
        ledger.record("Claude Monet", "Haystacks", "x").await.unwrap();
        ledger.record("Claude Monet", "Water Lilies", "x").await.unwrap();
        ledger.record("Berthe Morisot", "The Cradle", "x").await.unwrap();
        ledger.remove("Berthe Morisot", "The Cradle").await.unwrap();

        let scopes = ledger.list_scopes().await.unwrap();
        assert_eq!(scopes, vec!["Claude Monet", "Vincent van Gogh"]);
    }

    #[tokio::test]
    async fn test_scopes_use_separate_files() {
        let (ledger, _dir) = ledger();
        ledger.record("Claude Monet", "A", "x").await.unwrap();
        ledger.record("Edgar Degas", "B", "x").await.unwrap();
        assert!(ledger.scope_path("Claude Monet").ends_with("claude-monet.json"));
        assert!(ledger.scope_path("Claude Monet").exists());
        assert!(ledger.scope_path("Edgar Degas").exists());
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_scope() {
        let (ledger, _dir) = ledger();
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .record("Monet", &format!("Painting {}", i), "boom")
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.list("Monet").await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_hand_edited_file_is_read() {
        let (ledger, _dir) = ledger();
        let json = r#"[
            {
                "entity_key": "monet::haystacks",
                "scope": "Monet",
                "display_title": "Haystacks",
                "last_error": "edited by hand",
                "first_seen_at": "2024-01-01T00:00:00Z",
                "last_attempt_at": "2024-01-02T00:00:00Z",
                "retry_count": 3
            }
        ]"#;
        std::fs::write(ledger.scope_path("Monet"), json).unwrap();

        let record = ledger.record("Monet", "Haystacks", "again").await.unwrap();
        assert_eq!(record.retry_count, 4);
        assert_eq!(record.first_seen_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let (ledger, _dir) = ledger();
        std::fs::write(ledger.scope_path("Monet"), "not json").unwrap();
        let err = ledger.list("Monet").await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }
}
