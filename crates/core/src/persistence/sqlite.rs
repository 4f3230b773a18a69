//! SQLite-backed persistence adapter.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension};

use super::store::LocalObjectStore;
use super::{
    AssetPayload, Persistence, PersistenceError, RecordPayload, SourceLinkPayload, StoredObject,
};
use crate::slug::slugify;

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceCounts {
    pub parents: u64,
    pub records: u64,
    pub assets: u64,
    pub source_links: u64,
}

/// Relational store plus a local object store for asset bytes.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
    objects: LocalObjectStore,
}

fn db_err(e: rusqlite::Error) -> PersistenceError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            PersistenceError::AlreadyExists(e.to_string())
        }
        _ => PersistenceError::Database(e.to_string()),
    }
}

impl SqlitePersistence {
    /// Open the database file, creating tables if needed.
    pub fn new(path: &Path, objects: LocalObjectStore) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            objects,
        })
    }

    /// In-memory database (useful for testing).
    pub fn in_memory(objects: LocalObjectStore) -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            objects,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), PersistenceError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Parent entities (artists, authors)
            CREATE TABLE IF NOT EXISTS parents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- Canonical records, one per work
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER NOT NULL REFERENCES parents(id) ON DELETE CASCADE,
                natural_key TEXT NOT NULL,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                canonical_ref TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(parent_id, natural_key)
            );

            CREATE INDEX IF NOT EXISTS idx_records_slug ON records(parent_id, slug);

            -- Stored image assets
            CREATE TABLE IF NOT EXISTS assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                storage_path TEXT NOT NULL,
                public_url TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                file_size_bytes INTEGER NOT NULL,
                mime TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(record_id, storage_path)
            );

            CREATE INDEX IF NOT EXISTS idx_assets_hash ON assets(content_hash);

            -- Upstream identifiers linked to records
            CREATE TABLE IF NOT EXISTS source_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                native_id TEXT NOT NULL,
                record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                source_url TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(source, native_id)
            );
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::Database("connection lock poisoned".to_string()))
    }

    /// Number of rows in each table.
    pub fn counts(&self) -> Result<PersistenceCounts, PersistenceError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64, PersistenceError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(db_err)
        };
        Ok(PersistenceCounts {
            parents: count("parents")?,
            records: count("records")?,
            assets: count("assets")?,
            source_links: count("source_links")?,
        })
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn source_link_exists(&self, source: &str, native_id: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM source_links WHERE source = ? AND native_id = ?",
                params![source, native_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn linked_ids(&self, source: &str) -> Result<HashSet<String>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT native_id FROM source_links WHERE source = ?")
            .map_err(db_err)?;
        let ids = stmt
            .query_map(params![source], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(db_err)?;
        Ok(ids)
    }

    async fn ensure_parent_entity(&self, name: &str) -> Result<i64, PersistenceError> {
        let conn = self.conn()?;
        conn.query_row(
            "INSERT INTO parents (name, slug, created_at) VALUES (?, ?, ?)
             ON CONFLICT(slug) DO UPDATE SET name = parents.name
             RETURNING id",
            params![name, slugify(name), Utc::now().to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    async fn upsert_record(&self, payload: &RecordPayload) -> Result<i64, PersistenceError> {
        let conn = self.conn()?;
        conn.query_row(
            "INSERT INTO records (parent_id, natural_key, slug, title, canonical_ref, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(parent_id, natural_key) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title,
                canonical_ref = COALESCE(excluded.canonical_ref, records.canonical_ref),
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                payload.parent_id,
                payload.natural_key,
                payload.slug,
                payload.title,
                payload.canonical_ref,
                Utc::now().to_rfc3339(),
            ],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    async fn upsert_asset(&self, payload: &AssetPayload) -> Result<i64, PersistenceError> {
        let conn = self.conn()?;

        let owner: Option<i64> = conn
            .query_row(
                "SELECT record_id FROM assets WHERE content_hash = ? AND record_id != ? LIMIT 1",
                params![payload.content_hash, payload.record_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(owner) = owner {
            return Err(PersistenceError::AlreadyExists(format!(
                "asset {} already stored for record {}",
                payload.content_hash, owner
            )));
        }

        conn.query_row(
            "INSERT INTO assets (record_id, storage_path, public_url, content_hash, width, height,
                                 file_size_bytes, mime, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(record_id, storage_path) DO UPDATE SET
                public_url = excluded.public_url,
                content_hash = excluded.content_hash,
                width = excluded.width,
                height = excluded.height,
                file_size_bytes = excluded.file_size_bytes,
                mime = excluded.mime,
                updated_at = excluded.updated_at
             RETURNING id",
            params![
                payload.record_id,
                payload.storage_path,
                payload.public_url,
                payload.content_hash,
                payload.width,
                payload.height,
                payload.file_size_bytes as i64,
                payload.mime,
                Utc::now().to_rfc3339(),
            ],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    async fn upsert_source_link(&self, payload: &SourceLinkPayload) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO source_links (source, native_id, record_id, source_url, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source, native_id) DO UPDATE SET
                record_id = excluded.record_id,
                source_url = COALESCE(excluded.source_url, source_links.source_url),
                updated_at = excluded.updated_at",
            params![
                payload.source,
                payload.native_id,
                payload.record_id,
                payload.source_url,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn upload_bytes(&self, path: &str, bytes: &[u8], _mime: &str) -> Result<StoredObject, PersistenceError> {
        self.objects.put(path, bytes).await
    }
}
