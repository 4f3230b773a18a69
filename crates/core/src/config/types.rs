use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::governor::{mbps_to_bytes_per_sec, GovernorProfile};
use crate::orchestrator::OrchestratorConfig;
use crate::source::WikidataConfig;
use crate::variant::VariantThresholds;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub selection: VariantThresholds,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Sent with every request. Wikimedia rejects generic agents.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("harvester/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    30
}

/// Request pacing configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GovernorConfig {
    /// Profile for origins without an override.
    #[serde(default)]
    pub profile: GovernorProfile,
    /// Bandwidth ceiling in megabits per second. Defaults to the profile's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_mbps: Option<f64>,
    /// Origins with their own profile.
    #[serde(default)]
    pub origins: Vec<OriginConfig>,
}

impl GovernorConfig {
    pub fn bandwidth_bytes_per_sec(&self) -> u64 {
        self.bandwidth_mbps
            .map(mbps_to_bytes_per_sec)
            .unwrap_or_else(|| self.profile.bandwidth_bytes_per_sec())
    }
}

/// Profile override for one origin host
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    pub host: String,
    pub profile: GovernorProfile,
}

/// Failure ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_dir")]
    pub dir: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            dir: default_ledger_dir(),
        }
    }
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("failures")
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("harvest.db")
}

/// Asset storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Base URL stored assets are served from. Local paths are recorded
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("media")
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write Prometheus text exposition here at the end of a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_path: Option<PathBuf>,
}

/// Metadata sources
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikidata: Option<WikidataConfig>,
}
