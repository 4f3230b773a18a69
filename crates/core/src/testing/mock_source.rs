//! Mock metadata source for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::slug::slugify;
use crate::source::{MetadataSource, SourceError, SourceRecord};

/// Mock implementation of the MetadataSource trait.
///
/// Serves configured records per scope and counts lookups.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    scopes: Vec<String>,
    records: Arc<RwLock<HashMap<String, Vec<SourceRecord>>>>,
    failing_scopes: Arc<RwLock<HashMap<String, String>>>,
    lookups: Arc<RwLock<Vec<(String, Option<String>)>>>,
    stored_seen: Arc<RwLock<Vec<HashSet<String>>>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scopes: Vec::new(),
            records: Arc::new(RwLock::new(HashMap::new())),
            failing_scopes: Arc::new(RwLock::new(HashMap::new())),
            lookups: Arc::new(RwLock::new(Vec::new())),
            stored_seen: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Scopes reported by `scopes()`.
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Records served for `scope`.
    pub async fn set_records(&self, scope: &str, records: Vec<SourceRecord>) {
        self.records.write().await.insert(scope.to_string(), records);
    }

    /// Make every lookup in `scope` fail.
    pub async fn fail_scope(&self, scope: &str, message: &str) {
        self.failing_scopes
            .write()
            .await
            .insert(scope.to_string(), message.to_string());
    }

    /// `(scope, title)` of every lookup; title is `None` for whole-scope
    /// listings.
    pub async fn lookups(&self) -> Vec<(String, Option<String>)> {
        self.lookups.read().await.clone()
    }

    /// The `stored` set passed to each `records_for_scope` call.
    pub async fn stored_seen(&self) -> Vec<HashSet<String>> {
        self.stored_seen.read().await.clone()
    }

    async fn check(&self, scope: &str) -> Result<(), SourceError> {
        match self.failing_scopes.read().await.get(scope) {
            Some(message) => Err(SourceError::Malformed {
                source_name: self.name.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MetadataSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scopes(&self) -> Vec<String> {
        self.scopes.clone()
    }

    async fn records_for_scope(
        &self,
        scope: &str,
        stored: &HashSet<String>,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        self.lookups.write().await.push((scope.to_string(), None));
        self.stored_seen.write().await.push(stored.clone());
        self.check(scope).await?;
        let mut records = self
            .records
            .read()
            .await
            .get(scope)
            .cloned()
            .unwrap_or_default();
        for record in &mut records {
            if record.native_id.as_ref().is_some_and(|id| stored.contains(id)) {
                record.variants.clear();
            }
        }
        Ok(records)
    }

    async fn find_record(&self, scope: &str, title: &str) -> Result<Option<SourceRecord>, SourceError> {
        self.lookups
            .write()
            .await
            .push((scope.to_string(), Some(title.to_string())));
        self.check(scope).await?;
        Ok(self
            .records
            .read()
            .await
            .get(scope)
            .and_then(|records| {
                let wanted = slugify(title);
                records.iter().find(|r| slugify(&r.title) == wanted).cloned()
            }))
    }
}
