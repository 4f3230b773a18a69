//! Wikidata + Wikimedia Commons source.
//!
//! Works are found with a SPARQL query for items whose creator (P170) is
//! the scope's entity and that carry an image (P18). Each image is then
//! resolved through the Commons `imageinfo` API, which reports the original
//! file and a thumbnail rendered at the requested width.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ImageVariant, MetadataSource, SourceError, SourceRecord};
use crate::fetch::{FetchRetryEngine, HttpRequest, HttpTransport};
use crate::governor::GovernorPool;
use crate::slug::slugify;

pub const SOURCE_NAME: &str = "wikidata";

/// `[sources.wikidata]` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikidataConfig {
    #[serde(default = "default_sparql_url")]
    pub sparql_url: String,
    #[serde(default = "default_commons_api_url")]
    pub commons_api_url: String,
    /// Maximum works per scope.
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub scopes: Vec<WikidataScope>,
}

/// A named scope and the Wikidata entity of its creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikidataScope {
    pub name: String,
    pub qid: String,
}

fn default_sparql_url() -> String {
    "https://query.wikidata.org/sparql".to_string()
}

fn default_commons_api_url() -> String {
    "https://commons.wikimedia.org/w/api.php".to_string()
}

fn default_limit() -> u32 {
    200
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            sparql_url: default_sparql_url(),
            commons_api_url: default_commons_api_url(),
            limit: default_limit(),
            scopes: Vec::new(),
        }
    }
}

// SPARQL JSON results

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<WorkBinding>,
}

#[derive(Debug, Deserialize)]
struct WorkBinding {
    work: SparqlValue,
    #[serde(rename = "workLabel")]
    work_label: Option<SparqlValue>,
    image: SparqlValue,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

// Commons imageinfo

#[derive(Debug, Deserialize)]
struct ImageInfoResponse {
    query: Option<ImageInfoQuery>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoQuery {
    #[serde(default)]
    pages: std::collections::HashMap<String, ImageInfoPage>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoPage {
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: String,
    width: u32,
    height: u32,
    mime: String,
    thumburl: Option<String>,
    thumbwidth: Option<u32>,
    thumbheight: Option<u32>,
}

/// A work found by SPARQL, before its image is resolved.
#[derive(Debug, Clone)]
struct Work {
    qid: String,
    title: String,
    file_name: String,
}

/// Wikidata-backed [`MetadataSource`].
pub struct WikidataSource {
    config: WikidataConfig,
    target_width: u32,
    pool: Arc<GovernorPool>,
    transport: Arc<dyn HttpTransport>,
}

impl WikidataSource {
    /// `target_width` is the thumbnail width requested from Commons.
    pub fn new(
        config: WikidataConfig,
        target_width: u32,
        pool: Arc<GovernorPool>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            target_width,
            pool,
            transport,
        }
    }

    fn qid_for(&self, scope: &str) -> Result<String, SourceError> {
        let wanted = slugify(scope);
        self.config
            .scopes
            .iter()
            .find(|s| slugify(&s.name) == wanted)
            .map(|s| s.qid.clone())
            .ok_or_else(|| SourceError::UnknownScope(scope.to_string()))
    }

    fn malformed(message: impl Into<String>) -> SourceError {
        SourceError::Malformed {
            source_name: SOURCE_NAME.to_string(),
            message: message.into(),
        }
    }

    async fn works(&self, qid: &str) -> Result<Vec<Work>, SourceError> {
        let query = format!(
            "SELECT ?work ?workLabel ?image WHERE {{ \
               ?work wdt:P170 wd:{qid} ; wdt:P18 ?image . \
               SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"en\". }} \
             }} LIMIT {limit}",
            qid = qid,
            limit = self.config.limit,
        );
        let request = HttpRequest::get(&self.config.sparql_url)
            .with_query("query", query)
            .with_query("format", "json")
            .with_header("Accept", "application/sparql-results+json");

        let engine =
            FetchRetryEngine::for_url(&self.pool, Arc::clone(&self.transport), &request.url).await?;
        let response: SparqlResponse = engine.fetch_json(&request).await?;

        let mut seen = HashSet::new();
        let mut works = Vec::new();
        for binding in response.results.bindings {
            let Some(work_qid) = binding.work.value.rsplit('/').next().map(str::to_string) else {
                continue;
            };
            if !seen.insert(work_qid.clone()) {
                continue;
            }
            let Some(file_name) = file_name_from_image_uri(&binding.image.value) else {
                warn!(qid = %work_qid, image = %binding.image.value, "Unrecognized image URI");
                continue;
            };
            let title = binding
                .work_label
                .map(|label| label.value)
                .unwrap_or_else(|| work_qid.clone());
            works.push(Work {
                qid: work_qid,
                title,
                file_name,
            });
        }

        debug!(creator = %qid, works = works.len(), "Fetched works");
        Ok(works)
    }

    async fn image_info(&self, file_name: &str) -> Result<Option<ImageInfo>, SourceError> {
        let request = HttpRequest::get(&self.config.commons_api_url)
            .with_query("action", "query")
            .with_query("titles", format!("File:{}", file_name))
            .with_query("prop", "imageinfo")
            .with_query("iiprop", "url|size|mime")
            .with_query("iiurlwidth", self.target_width.to_string())
            .with_query("format", "json");

        let engine =
            FetchRetryEngine::for_url(&self.pool, Arc::clone(&self.transport), &request.url).await?;
        let response: ImageInfoResponse = engine.fetch_json(&request).await?;

        let query = response
            .query
            .ok_or_else(|| Self::malformed("imageinfo response without query"))?;
        Ok(query
            .pages
            .into_values()
            .flat_map(|page| page.imageinfo)
            .next())
    }

    async fn resolve(&self, scope: &str, work: Work) -> Result<SourceRecord, SourceError> {
        let variants = match self.image_info(&work.file_name).await? {
            Some(info) => variants_from(info),
            None => {
                warn!(qid = %work.qid, file = %work.file_name, "Commons has no such file");
                Vec::new()
            }
        };
        Ok(record_for(scope, work, variants))
    }
}

fn record_for(scope: &str, work: Work, variants: Vec<ImageVariant>) -> SourceRecord {
    SourceRecord {
        source: SOURCE_NAME.to_string(),
        native_id: Some(work.qid.clone()),
        canonical_ref: Some(work.qid),
        scope: scope.to_string(),
        title: work.title,
        variants,
    }
}

/// Commons file name from a `Special:FilePath/<name>` URI.
fn file_name_from_image_uri(uri: &str) -> Option<String> {
    let encoded = uri.split("Special:FilePath/").nth(1)?;
    let decoded = urlencoding::decode(encoded).ok()?;
    let name = decoded.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Thumbnail first, then the original file.
fn variants_from(info: ImageInfo) -> Vec<ImageVariant> {
    let mut variants = Vec::with_capacity(2);

    if let (Some(url), Some(width), Some(height)) = (info.thumburl, info.thumbwidth, info.thumbheight) {
        if url != info.url && width < info.width {
            // Commons renders TIFF thumbnails as JPEG.
            let mime = if info.mime == "image/tiff" {
                "image/jpeg".to_string()
            } else {
                info.mime.clone()
            };
            variants.push(ImageVariant::new(url, width, height, mime));
        }
    }

    variants.push(ImageVariant::new(info.url, info.width, info.height, info.mime));
    variants
}

#[async_trait]
impl MetadataSource for WikidataSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn scopes(&self) -> Vec<String> {
        self.config.scopes.iter().map(|s| s.name.clone()).collect()
    }

    async fn records_for_scope(
        &self,
        scope: &str,
        stored: &HashSet<String>,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let qid = self.qid_for(scope)?;
        let works = self.works(&qid).await?;

        let mut records = Vec::with_capacity(works.len());
        for work in works {
            if stored.contains(&work.qid) {
                debug!(qid = %work.qid, "Already stored, not resolving image");
                records.push(record_for(scope, work, Vec::new()));
                continue;
            }
            let qid = work.qid.clone();
            match self.resolve(scope, work).await {
                Ok(record) => records.push(record),
                Err(SourceError::Fetch(e)) if !e.is_rate_limited() => {
                    warn!(qid = %qid, error = %e, "Skipping work whose image could not be resolved");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn find_record(&self, scope: &str, title: &str) -> Result<Option<SourceRecord>, SourceError> {
        let qid = self.qid_for(scope)?;
        let wanted = slugify(title);
        let work = self
            .works(&qid)
            .await?
            .into_iter()
            .find(|work| slugify(&work.title) == wanted);

        match work {
            Some(work) => Ok(Some(self.resolve(scope, work).await?)),
            None => Ok(None),
        }
    }
}
