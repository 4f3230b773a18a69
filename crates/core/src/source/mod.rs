//! Metadata sources: upstream catalogs that yield [`SourceRecord`]s.

mod types;
pub mod wikidata;

pub use types::*;
pub use wikidata::{WikidataConfig, WikidataScope, WikidataSource};

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::slug::slugify;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("unexpected response from {source_name}: {message}")]
    Malformed { source_name: String, message: String },
}

/// An upstream catalog.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Source name stored in source links (e.g. "wikidata").
    fn name(&self) -> &str;

    /// Scopes this source is configured to harvest.
    fn scopes(&self) -> Vec<String>;

    /// Every record the source offers for `scope`.
    ///
    /// Records whose native id is in `stored` are returned without variants,
    /// skipping whatever per-record lookups resolving them would cost.
    async fn records_for_scope(
        &self,
        scope: &str,
        stored: &HashSet<String>,
    ) -> Result<Vec<SourceRecord>, SourceError>;

    /// Re-resolve one title, used by ledger retry sweeps. `None` when the
    /// source no longer returns it.
    async fn find_record(&self, scope: &str, title: &str) -> Result<Option<SourceRecord>, SourceError> {
        let wanted = slugify(title);
        Ok(self
            .records_for_scope(scope, &HashSet::new())
            .await?
            .into_iter()
            .find(|record| slugify(&record.title) == wanted))
    }
}
