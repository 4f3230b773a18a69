//! Ingestion orchestrator implementation.
//!
//! Each record goes through: dedup check -> variant selection -> governed
//! download -> dimension validation -> idempotent persistence -> ledger
//! update. Per-record failures never stop the run.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use image::ImageReader;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::fetch::{DownloadedAsset, FailureKind, FetchError, FetchRetryEngine, HttpTransport};
use crate::governor::GovernorPool;
use crate::ledger::FailureLedger;
use crate::metrics;
use crate::persistence::{
    storage_path, AssetPayload, Persistence, PersistenceError, RecordPayload, SourceLinkPayload,
};
use crate::slug::slugify;
use crate::source::{ImageVariant, MetadataSource, SourceRecord};
use crate::variant::{select_variant, VariantThresholds};

use super::config::OrchestratorConfig;
use super::types::{
    OrchestratorError, PipelineOutcome, RecordError, RecordOutcome, SkipReason,
};

/// Drives source records into persistence.
///
/// Built once per process; every worker shares its governors, so the
/// per-origin budgets hold regardless of `max_workers`.
pub struct IngestionOrchestrator {
    config: OrchestratorConfig,
    thresholds: VariantThresholds,
    pool: Arc<GovernorPool>,
    transport: Arc<dyn HttpTransport>,
    persistence: Arc<dyn Persistence>,
    ledger: Arc<dyn FailureLedger>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl IngestionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        thresholds: VariantThresholds,
        pool: Arc<GovernorPool>,
        transport: Arc<dyn HttpTransport>,
        persistence: Arc<dyn Persistence>,
        ledger: Arc<dyn FailureLedger>,
    ) -> Self {
        Self {
            config,
            thresholds,
            pool,
            transport,
            persistence,
            ledger,
            cooldown_until: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Process `records` one after another.
    pub async fn run(&self, records: &[SourceRecord]) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        for record in records {
            self.wait_for_cooldown().await;
            let result = self.process_record(record).await;
            outcome.record(&result);
        }
        outcome
    }

    /// Fetch every record of `scope` from `source` and process them.
    ///
    /// Ids already linked in persistence are handed to the source so it can
    /// skip resolving their images.
    pub async fn run_source(
        &self,
        source: &dyn MetadataSource,
        scope: &str,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let stored = self.persistence.linked_ids(source.name()).await?;
        let records = source.records_for_scope(scope, &stored).await?;
        info!(
            source = source.name(),
            scope,
            records = records.len(),
            already_stored = stored.len(),
            "Harvesting scope"
        );

        let outcome = self.run(&records).await;
        info!(source = source.name(), scope, summary = %outcome.summary_line(), "Scope done");
        Ok(outcome)
    }

    /// Harvest several scopes on a pool of `max_workers`.
    ///
    /// A scope that cannot be listed is reported as one error named after
    /// the scope.
    pub async fn run_scopes(&self, source: &dyn MetadataSource, scopes: &[String]) -> PipelineOutcome {
        let outcomes: Vec<PipelineOutcome> = stream::iter(scopes)
            .map(|scope| async move {
                match self.run_source(source, scope).await {
                    Ok(outcome) => outcome,
                    Err(e) => scope_failure(scope, &e),
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        merge_all(outcomes)
    }

    /// Re-run every ledger entry of `scope`.
    ///
    /// Each title is re-resolved through `source`; titles the source no
    /// longer returns are cleared from the ledger.
    pub async fn retry_failures(
        &self,
        source: &dyn MetadataSource,
        scope: &str,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let entries = self.ledger.list(scope).await?;
        info!(scope, entries = entries.len(), "Retrying recorded failures");

        let mut outcome = PipelineOutcome::default();
        for entry in entries {
            self.wait_for_cooldown().await;

            let result = match source.find_record(scope, &entry.display_title).await {
                Ok(Some(record)) => self.process_record(&record).await,
                Ok(None) => {
                    debug!(scope, title = %entry.display_title, "Source no longer lists title");
                    self.clear_ledger(scope, &entry.display_title).await;
                    self.finish(&entry.display_title, RecordOutcome::Skipped(SkipReason::NotFound))
                }
                Err(e) => {
                    let kind = match &e {
                        crate::source::SourceError::Fetch(fetch) => fetch.kind(),
                        _ => FailureKind::Fatal,
                    };
                    if kind == FailureKind::RateLimited {
                        self.start_cooldown().await;
                    }
                    self.fail(scope, &entry.display_title, e.to_string(), kind).await
                }
            };
            outcome.record(&result);
        }
        Ok(outcome)
    }

    /// Retry the ledger entries of every scope that has any, on a pool of
    /// `max_workers`.
    pub async fn retry_all(&self, source: &dyn MetadataSource) -> Result<PipelineOutcome, OrchestratorError> {
        let scopes = self.ledger.list_scopes().await?;
        let outcomes: Vec<PipelineOutcome> = stream::iter(&scopes)
            .map(|scope| async move {
                match self.retry_failures(source, scope).await {
                    Ok(outcome) => outcome,
                    Err(e) => scope_failure(scope, &e),
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        Ok(merge_all(outcomes))
    }

    /// Drive one record through the pipeline.
    pub async fn process_record(&self, record: &SourceRecord) -> RecordOutcome {
        let scope = record.scope.as_str();
        let title = record.title.as_str();
        let key = record.source_key();

        // 1. Dedup
        if let Some(key) = &key {
            match self.persistence.source_link_exists(&key.source, &key.id).await {
                Ok(true) => {
                    self.clear_ledger(scope, title).await;
                    return self.finish(title, RecordOutcome::Skipped(SkipReason::AlreadyStored));
                }
                Ok(false) => {}
                Err(e) => return self.fail(scope, title, e.to_string(), FailureKind::Fatal).await,
            }
        }

        // 2. Variant selection
        let Some(variant) = select_variant(&record.variants, &self.thresholds) else {
            self.clear_ledger(scope, title).await;
            return self.finish(title, RecordOutcome::Skipped(SkipReason::NoQualifyingVariant));
        };

        // 3. Governed download
        let asset = match self.download(variant).await {
            Ok(asset) => asset,
            Err(e) if e.is_not_found() => {
                self.clear_ledger(scope, title).await;
                return self.finish(title, RecordOutcome::Skipped(SkipReason::NotFound));
            }
            Err(e) => {
                if e.is_rate_limited() {
                    self.start_cooldown().await;
                }
                return self.fail(scope, title, e.to_string(), e.kind()).await;
            }
        };

        // 4. Validate what actually arrived
        let (width, height) = match image_dimensions(&asset.bytes) {
            Ok(dimensions) => dimensions,
            Err(message) => {
                let message = format!("undecodable image from {}: {}", variant.url, message);
                return self.fail(scope, title, message, FailureKind::Fatal).await;
            }
        };
        if !self.thresholds.accepts_dimensions(width, height) {
            warn!(
                title,
                url = %variant.url,
                claimed = %format!("{}x{}", variant.width, variant.height),
                actual = %format!("{}x{}", width, height),
                "Downloaded image smaller than advertised"
            );
            self.clear_ledger(scope, title).await;
            return self.finish(
                title,
                RecordOutcome::Skipped(SkipReason::InvalidDimensions { width, height }),
            );
        }

        // 5. Persist
        let persisted = self
            .persist(record, variant, &asset, width, height)
            .await;
        let outcome = match persisted {
            Ok(outcome) => outcome,
            Err(PersistenceError::AlreadyExists(detail)) => {
                debug!(title, detail = %detail, "Persistence reports duplicate");
                RecordOutcome::Skipped(SkipReason::AlreadyExists)
            }
            Err(e) => return self.fail(scope, title, e.to_string(), FailureKind::Fatal).await,
        };

        // 6. Clear any stale failure
        self.clear_ledger(scope, title).await;
        self.finish(title, outcome)
    }

    async fn download(&self, variant: &ImageVariant) -> Result<DownloadedAsset, FetchError> {
        let engine =
            FetchRetryEngine::for_url(&self.pool, Arc::clone(&self.transport), &variant.url).await?;
        engine.download(variant).await
    }

    async fn persist(
        &self,
        record: &SourceRecord,
        variant: &ImageVariant,
        asset: &DownloadedAsset,
        width: u32,
        height: u32,
    ) -> Result<RecordOutcome, PersistenceError> {
        let parent_id = self.persistence.ensure_parent_entity(&record.scope).await?;

        let path = storage_path(&record.scope, &asset.content_hash, &asset.file_extension);
        let object = self
            .persistence
            .upload_bytes(&path, &asset.bytes, &asset.mime)
            .await?;

        let record_id = self
            .persistence
            .upsert_record(&RecordPayload {
                parent_id,
                natural_key: record.record_key(),
                slug: slugify(&record.title),
                title: record.title.clone(),
                canonical_ref: record.canonical_ref.clone(),
            })
            .await?;

        let stored = self
            .persistence
            .upsert_asset(&AssetPayload {
                record_id,
                storage_path: object.path.clone(),
                public_url: object.public_url.clone(),
                content_hash: asset.content_hash.clone(),
                width,
                height,
                file_size_bytes: asset.file_size_bytes,
                mime: asset.mime.clone(),
            })
            .await;
        // Identical bytes already belong to another record; the source link
        // is still written.
        let duplicate = match stored {
            Ok(_) => None,
            Err(PersistenceError::AlreadyExists(detail)) => Some(detail),
            Err(e) => return Err(e),
        };

        if let Some(key) = record.source_key() {
            self.persistence
                .upsert_source_link(&SourceLinkPayload {
                    source: key.source,
                    native_id: key.id,
                    record_id,
                    source_url: Some(variant.url.clone()),
                })
                .await?;
        }

        if let Some(detail) = duplicate {
            debug!(title = %record.title, detail = %detail, "Content already stored for another record");
            return Ok(RecordOutcome::Skipped(SkipReason::AlreadyExists));
        }
        Ok(RecordOutcome::Uploaded { record_id, object })
    }

    async fn clear_ledger(&self, scope: &str, title: &str) {
        if let Err(e) = self.ledger.remove(scope, title).await {
            error!(scope, title, error = %e, "Failed to clear ledger entry");
        }
    }

    /// Record a failure in the ledger and build the outcome for it.
    async fn fail(&self, scope: &str, title: &str, message: String, kind: FailureKind) -> RecordOutcome {
        warn!(scope, title, kind = ?kind, error = %message, "Record failed");
        if let Err(e) = self.ledger.record(scope, title, &message).await {
            error!(scope, title, error = %e, "Failed to record failure in ledger");
        }
        self.finish(
            title,
            RecordOutcome::Failed(RecordError {
                title: title.to_string(),
                message,
                kind,
            }),
        )
    }

    fn finish(&self, title: &str, outcome: RecordOutcome) -> RecordOutcome {
        metrics::RECORDS_PROCESSED
            .with_label_values(&[outcome.label()])
            .inc();
        match &outcome {
            RecordOutcome::Uploaded { object, .. } => {
                info!(title, path = %object.path, "Uploaded");
            }
            RecordOutcome::Skipped(reason) => {
                debug!(title, reason = %reason, "Skipped");
            }
            RecordOutcome::Failed(_) => {}
        }
        outcome
    }

    async fn start_cooldown(&self) {
        let cooldown = Duration::from_secs(self.config.rate_limit_cooldown_secs);
        let until = Instant::now() + cooldown;
        let mut current = self.cooldown_until.lock().await;
        if current.map_or(true, |existing| existing < until) {
            warn!(cooldown_secs = cooldown.as_secs(), "Rate limited, pausing the run");
            *current = Some(until);
        }
    }

    async fn wait_for_cooldown(&self) {
        let until = *self.cooldown_until.lock().await;
        if let Some(until) = until {
            if until > Instant::now() {
                sleep_until(until).await;
            }
        }
    }
}

/// Width and height decoded from image headers.
fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

fn scope_failure(scope: &str, error: &OrchestratorError) -> PipelineOutcome {
    error!(scope, error = %error, "Scope failed");
    let kind = match error {
        OrchestratorError::Source(crate::source::SourceError::Fetch(e)) => e.kind(),
        _ => FailureKind::Fatal,
    };
    PipelineOutcome {
        errors: vec![RecordError {
            title: scope.to_string(),
            message: error.to_string(),
            kind,
        }],
        ..Default::default()
    }
}

fn merge_all(outcomes: Vec<PipelineOutcome>) -> PipelineOutcome {
    outcomes
        .into_iter()
        .fold(PipelineOutcome::default(), |mut total, outcome| {
            total.merge(outcome);
            total
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpResponse;
    use crate::governor::GovernorProfile;
    use crate::ledger::FileFailureLedger;
    use crate::testing::{fixtures, MockPersistence, MockSource, MockTransport, PersistenceOp};
    use tempfile::TempDir;

    const SCOPE: &str = "Claude Monet";

    struct Harness {
        orchestrator: IngestionOrchestrator,
        transport: Arc<MockTransport>,
        persistence: Arc<MockPersistence>,
        ledger: Arc<FileFailureLedger>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        let persistence = Arc::new(MockPersistence::new());
        let ledger = Arc::new(FileFailureLedger::open(dir.path().join("failures")).unwrap());
        let pool = Arc::new(GovernorPool::new(GovernorProfile::Normal, Vec::new(), 1_000_000_000));

        let orchestrator = IngestionOrchestrator::new(
            OrchestratorConfig {
                max_workers: 2,
                rate_limit_cooldown_secs: 120,
                error_summary_limit: 10,
            },
            VariantThresholds::default(),
            pool,
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::clone(&persistence) as Arc<dyn Persistence>,
            Arc::clone(&ledger) as Arc<dyn FailureLedger>,
        );

        Harness {
            orchestrator,
            transport,
            persistence,
            ledger,
            _dir: dir,
        }
    }

    fn valid_record(id: &str, title: &str) -> SourceRecord {
        fixtures::record(
            SCOPE,
            id,
            title,
            vec![fixtures::variant(&format!("{}.png", id), 2000, 1500, "image/png")],
        )
    }

    async fn serve_png(transport: &MockTransport, record: &SourceRecord, width: u32, height: u32) {
        transport
            .set_fallback(
                &record.variants[0].url,
                HttpResponse::ok(fixtures::png_bytes(width, height), "image/png"),
            )
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_record_is_uploaded_and_linked() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 2000, 1500).await;

        let outcome = h.orchestrator.process_record(&record).await;

        let RecordOutcome::Uploaded { object, .. } = outcome else {
            panic!("expected upload, got {:?}", outcome);
        };
        assert!(object.path.starts_with("claude-monet/"));
        assert!(object.path.ends_with(".png"));
        assert_eq!(h.persistence.asset_count().await, 1);
        assert!(h.persistence.source_link_exists("mock", "Q1").await.unwrap());

        let assets = h.persistence.assets().await;
        assert_eq!((assets[0].width, assets[0].height), (2000, 1500));
        assert_eq!(
            assets[0].content_hash,
            crate::fetch::sha256_hex(&h.persistence.object(&object.path).await.unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_stored_is_skipped_without_download() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        h.persistence.seed_source_link("mock", "Q1").await;

        let outcome = h.orchestrator.process_record(&record).await;
        assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::AlreadyStored));
        assert_eq!(h.transport.total_requests().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_qualifying_variant_clears_ledger() {
        let h = harness();
        h.ledger.record(SCOPE, "Sketch", "old failure").await.unwrap();
        let record = fixtures::record(
            SCOPE,
            "Q2",
            "Sketch",
            vec![fixtures::variant("sketch.svg", 4000, 4000, "image/svg+xml")],
        );

        let outcome = h.orchestrator.process_record(&record).await;
        assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::NoQualifyingVariant));
        assert!(h.ledger.list(SCOPE).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_recorded() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        h.transport
            .set_fallback(&record.variants[0].url, HttpResponse::status(503))
            .await;

        let outcome = h.orchestrator.process_record(&record).await;
        let RecordOutcome::Failed(error) = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(error.kind, FailureKind::Transient);
        assert_eq!(error.title, "Water Lilies");

        let entries = h.ledger.list(SCOPE).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 0);
        assert!(entries[0].last_error.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_skipped_and_cleared() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        h.ledger.record(SCOPE, "Water Lilies", "HTTP 503").await.unwrap();
        h.transport
            .set_fallback(&record.variants[0].url, HttpResponse::status(404))
            .await;

        let outcome = h.orchestrator.process_record(&record).await;
        assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::NotFound));
        assert!(h.ledger.list(SCOPE).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lying_metadata_fails_dimension_check() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 640, 480).await;

        let outcome = h.orchestrator.process_record(&record).await;
        assert_eq!(
            outcome,
            RecordOutcome::Skipped(SkipReason::InvalidDimensions {
                width: 640,
                height: 480
            })
        );
        assert_eq!(h.persistence.asset_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_bytes_are_fatal() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        h.transport
            .set_fallback(
                &record.variants[0].url,
                HttpResponse::ok(b"definitely not an image".to_vec(), "image/png"),
            )
            .await;

        let outcome = h.orchestrator.process_record(&record).await;
        assert!(matches!(
            outcome,
            RecordOutcome::Failed(RecordError {
                kind: FailureKind::Fatal,
                ..
            })
        ));
        assert_eq!(h.ledger.list(SCOPE).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_exists_is_skip_not_ledger() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 2000, 1500).await;
        h.persistence.conflict(PersistenceOp::UpsertAsset).await;

        let outcome = h.orchestrator.process_record(&record).await;
        assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::AlreadyExists));
        assert!(h.ledger.list(SCOPE).await.unwrap().is_empty());
        assert!(h.persistence.source_link_exists("mock", "Q1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_content_is_not_downloaded_again() {
        let h = harness();
        let original = valid_record("Q1", "Haystacks");
        let copy = valid_record("Q2", "Haystacks (copy)");
        let bytes = fixtures::png_bytes(2000, 1500);
        for record in [&original, &copy] {
            h.transport
                .set_fallback(&record.variants[0].url, HttpResponse::ok(bytes.clone(), "image/png"))
                .await;
        }
        let records = vec![original, copy];

        let first = h.orchestrator.run(&records).await;
        assert_eq!((first.uploaded, first.skipped), (1, 1));
        assert_eq!(h.persistence.asset_count().await, 1);

        let second = h.orchestrator.run(&records).await;
        assert_eq!((second.uploaded, second.skipped), (0, 2));
        assert_eq!(h.transport.request_count(&records[1].variants[0].url).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_works_sharing_a_title_are_stored_separately() {
        let h = harness();
        let first = valid_record("Q1", "Self-Portrait");
        let second = valid_record("Q2", "Self-Portrait");
        serve_png(&h.transport, &first, 2000, 1500).await;
        serve_png(&h.transport, &second, 2400, 1800).await;

        let outcome = h.orchestrator.run(&[first, second]).await;
        assert_eq!(outcome.uploaded, 2);
        assert_eq!(h.persistence.record_count().await, 2);
        assert_eq!(h.persistence.asset_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_error() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 2000, 1500).await;
        h.persistence
            .fail(PersistenceOp::UpsertRecord, "disk full")
            .await;

        let outcome = h.orchestrator.process_record(&record).await;
        let RecordOutcome::Failed(error) = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(error.kind, FailureKind::Fatal);
        assert!(error.message.contains("disk full"));
        assert_eq!(h.ledger.list(SCOPE).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_after_failures() {
        let h = harness();
        let failing = valid_record("Q1", "Haystacks");
        let good = valid_record("Q2", "Water Lilies");
        h.transport
            .set_fallback(&failing.variants[0].url, HttpResponse::status(500))
            .await;
        serve_png(&h.transport, &good, 2000, 1500).await;

        let outcome = h.orchestrator.run(&[failing, good]).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].title, "Haystacks");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pauses_the_run() {
        let h = harness();
        let throttled = valid_record("Q1", "Haystacks");
        let next = valid_record("Q2", "Water Lilies");
        h.transport
            .set_fallback(
                &throttled.variants[0].url,
                HttpResponse::status(429).with_retry_after("1"),
            )
            .await;
        serve_png(&h.transport, &next, 2000, 1500).await;

        let start = Instant::now();
        let outcome = h.orchestrator.run(&[throttled, next]).await;

        assert_eq!(outcome.errors[0].kind, FailureKind::RateLimited);
        assert_eq!(outcome.uploaded, 1);
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failures_sweep() {
        let h = harness();
        let fixed = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &fixed, 2000, 1500).await;
        h.ledger.record(SCOPE, "Water Lilies", "HTTP 503").await.unwrap();
        h.ledger.record(SCOPE, "Lost Painting", "HTTP 503").await.unwrap();

        let source = MockSource::new("mock");
        source.set_records(SCOPE, vec![fixed]).await;

        let outcome = h.orchestrator.retry_failures(&source, SCOPE).await.unwrap();
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(h.ledger.list(SCOPE).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failure_again_bumps_retry_count() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        h.transport
            .set_fallback(&record.variants[0].url, HttpResponse::status(503))
            .await;
        h.ledger.record(SCOPE, "Water Lilies", "HTTP 503").await.unwrap();

        let source = MockSource::new("mock");
        source.set_records(SCOPE, vec![record]).await;

        let outcome = h.orchestrator.retry_failures(&source, SCOPE).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(h.ledger.list(SCOPE).await.unwrap()[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_source_passes_linked_ids_to_source() {
        let h = harness();
        let stored = valid_record("Q1", "Water Lilies");
        let fresh = valid_record("Q2", "Haystacks");
        serve_png(&h.transport, &fresh, 2000, 1500).await;
        h.persistence.seed_source_link("mock", "Q1").await;

        let source = MockSource::new("mock");
        source.set_records(SCOPE, vec![stored, fresh]).await;

        let outcome = h.orchestrator.run_source(&source, SCOPE).await.unwrap();
        assert_eq!((outcome.uploaded, outcome.skipped), (1, 1));

        let seen = source.stored_seen().await;
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("Q1"));
        assert!(!seen[0].contains("Q2"));
        assert_eq!(h.transport.total_requests().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sweep_matches_titles_by_slug() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 2000, 1500).await;
        h.ledger.record(SCOPE, "water  lilies!", "HTTP 503").await.unwrap();

        let source = MockSource::new("mock");
        source.set_records(SCOPE, vec![record]).await;

        let outcome = h.orchestrator.retry_failures(&source, SCOPE).await.unwrap();
        assert_eq!(outcome.uploaded, 1);
        assert!(h.ledger.list(SCOPE).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scopes_isolates_failing_scope() {
        let h = harness();
        let record = valid_record("Q1", "Water Lilies");
        serve_png(&h.transport, &record, 2000, 1500).await;

        let source = MockSource::new("mock");
        source.set_records(SCOPE, vec![record]).await;
        source.fail_scope("Edgar Degas", "endpoint down").await;

        let outcome = h
            .orchestrator
            .run_scopes(&source, &[SCOPE.to_string(), "Edgar Degas".to_string()])
            .await;
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].title, "Edgar Degas");
        assert!(outcome.has_unrecoverable_errors());
    }

    #[test]
    fn test_image_dimensions() {
        assert_eq!(image_dimensions(&fixtures::png_bytes(30, 20)), Ok((30, 20)));
        assert!(image_dimensions(b"nope").is_err());
    }
}
