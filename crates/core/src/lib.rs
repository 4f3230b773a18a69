pub mod config;
pub mod fetch;
pub mod governor;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod slug;
pub mod source;
pub mod testing;
pub mod variant;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use fetch::{
    DownloadedAsset, FailureKind, FetchError, FetchKind, FetchRetryEngine, HttpTransport,
    ReqwestTransport,
};
pub use governor::{
    BandwidthGovernor, GovernorPool, GovernorProfile, RateGovernor, RetryPolicy,
};
pub use ledger::{FailureLedger, FailureRecord, FileFailureLedger, LedgerError};
pub use orchestrator::{
    IngestionOrchestrator, OrchestratorConfig, OrchestratorError, PipelineOutcome, RecordError,
    RecordOutcome, SkipReason,
};
pub use persistence::{LocalObjectStore, Persistence, PersistenceError, SqlitePersistence};
pub use source::{ImageVariant, MetadataSource, SourceError, SourceRecord, WikidataSource};
pub use variant::{select_variant, VariantThresholds};
