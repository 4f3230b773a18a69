//! Durable record of failed ingestion attempts, grouped by scope.
//!
//! A scope is the parent entity a record belongs to (typically an artist).
//! Entries let a later sweep retry exactly what failed instead of rescanning
//! every source.

mod file;

pub use file::FileFailureLedger;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slug::slugify;

/// One outstanding failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// `<scope-key>::<title-key>`, stable across runs.
    pub entity_key: String,
    /// Scope name as given by the caller.
    pub scope: String,
    pub display_title: String,
    pub last_error: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    /// 0 on first failure, incremented by every repeat failure.
    pub retry_count: u32,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger file {path} is not valid JSON: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Storage for failure records.
#[async_trait]
pub trait FailureLedger: Send + Sync {
    /// Insert a failure, or replace the error of an existing one and bump its
    /// retry count.
    async fn record(&self, scope: &str, title: &str, error: &str) -> Result<FailureRecord, LedgerError>;

    /// Entries of one scope; empty if none.
    async fn list(&self, scope: &str) -> Result<Vec<FailureRecord>, LedgerError>;

    /// Delete an entry. Returns whether something was removed; removing a
    /// missing entry is not an error.
    async fn remove(&self, scope: &str, title: &str) -> Result<bool, LedgerError>;

    /// Scopes with at least one outstanding failure.
    async fn list_scopes(&self) -> Result<Vec<String>, LedgerError>;
}

/// Stable entity key for `(scope, title)`.
pub fn entity_key(scope: &str, title: &str) -> String {
    format!("{}::{}", slugify(scope), slugify(title))
}
