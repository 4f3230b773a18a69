//! Records handed to the ingestion pipeline by metadata sources.

use serde::{Deserialize, Serialize};

use crate::slug::slugify;

/// One renderable size of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVariant {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub mime: String,
}

impl ImageVariant {
    pub fn new(url: impl Into<String>, width: u32, height: u32, mime: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            mime: mime.into(),
        }
    }

    /// Larger of width and height.
    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// A catalog entry fetched from an upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Upstream source name (e.g. "wikidata").
    pub source: String,
    /// Identifier native to the source, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    /// Cross-catalog entity id (e.g. a Wikidata QID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_ref: Option<String>,
    /// Parent entity the record belongs to (e.g. the artist). Also the
    /// failure ledger scope.
    pub scope: String,
    /// Display title.
    pub title: String,
    /// Available renditions.
    #[serde(default)]
    pub variants: Vec<ImageVariant>,
}

/// Key used to detect records that were already stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source: String,
    pub id: String,
}

impl SourceRecord {
    /// `(source, native id)`, or `(source, canonical ref)` when the source
    /// has no native id. `None` if the record has neither.
    pub fn source_key(&self) -> Option<SourceKey> {
        self.native_id
            .as_ref()
            .or(self.canonical_ref.as_ref())
            .filter(|id| !id.trim().is_empty())
            .map(|id| SourceKey {
                source: self.source.clone(),
                id: id.clone(),
            })
    }

    /// Identity of the stored record: the canonical ref, else
    /// `<source>:<id>`, else the title slug.
    ///
    /// Two works sharing a title stay apart as long as either carries an id.
    pub fn record_key(&self) -> String {
        if let Some(canonical) = self.canonical_ref.as_deref().filter(|r| !r.trim().is_empty()) {
            return canonical.to_string();
        }
        match self.source_key() {
            Some(key) => format!("{}:{}", key.source, key.id),
            None => slugify(&self.title),
        }
    }
}
