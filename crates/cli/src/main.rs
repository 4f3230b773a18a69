use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, Registry, TextEncoder};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester_core::fetch::HttpTransport;
use harvester_core::metrics::register_metrics;
use harvester_core::{
    load_config, validate_config, Config, FailureLedger, FileFailureLedger, GovernorPool,
    IngestionOrchestrator, LocalObjectStore, MetadataSource, Persistence, PipelineOutcome,
    ReqwestTransport, SqlitePersistence, WikidataSource,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Harvest image records into the media store")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, env = "HARVEST_CONFIG", default_value = "harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Harvest every configured scope (default).
    Harvest {
        /// Only harvest these scopes.
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },
    /// Retry every failure recorded in the ledger.
    RetryFailed,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Fatal error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Returns whether the run finished without unrecoverable errors.
async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(config.logging.json);

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config = ?cli.config,
        config_hash = &config_hash[..16],
        profile = ?config.governor.profile,
        "Starting harvester"
    );

    let registry = Registry::new();
    register_metrics(&registry).context("Failed to register metrics")?;

    let pool = Arc::new(GovernorPool::from_config(&config.governor));
    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(
            &config.http.user_agent,
            Duration::from_secs(config.http.timeout_secs),
        )
        .context("Failed to create HTTP client")?,
    );

    let objects = LocalObjectStore::new(
        config.storage.root.clone(),
        config.storage.public_base_url.clone(),
    );
    let persistence: Arc<dyn Persistence> = Arc::new(
        SqlitePersistence::new(&config.database.path, objects)
            .context("Failed to open database")?,
    );
    info!(path = ?config.database.path, "Database ready");

    let ledger: Arc<dyn FailureLedger> = Arc::new(
        FileFailureLedger::open(&config.ledger.dir).context("Failed to open failure ledger")?,
    );

    let source = build_source(&config, Arc::clone(&pool), Arc::clone(&transport))?;

    let orchestrator = IngestionOrchestrator::new(
        config.orchestrator.clone(),
        config.selection.clone(),
        Arc::clone(&pool),
        transport,
        persistence,
        ledger,
    );

    let command = cli.command.unwrap_or(Command::Harvest { scopes: Vec::new() });
    let outcome = match command {
        Command::Harvest { scopes } => {
            let scopes = if scopes.is_empty() {
                source.scopes()
            } else {
                scopes
            };
            info!(scopes = scopes.len(), workers = config.orchestrator.max_workers, "Harvesting");
            orchestrator.run_scopes(source.as_ref(), &scopes).await
        }
        Command::RetryFailed => orchestrator
            .retry_all(source.as_ref())
            .await
            .context("Failed to read failure ledger")?,
    };

    for (origin, status) in pool.all_status().await {
        info!(
            origin = %origin,
            profile = ?status.profile,
            last_second = status.requests_last_second,
            last_minute = status.requests_last_minute,
            "Governor status"
        );
    }
    let bandwidth = pool.bandwidth().stats().await;
    info!(
        bytes_in_window = bandwidth.bytes_in_window,
        max_bytes_per_sec = bandwidth.max_bytes_per_sec,
        "Bandwidth status"
    );

    print!("{}", render_summary(&outcome, config.orchestrator.error_summary_limit));

    if let Some(path) = &config.metrics.dump_path {
        if let Err(e) = write_metrics(&registry, path) {
            warn!(path = ?path, error = %e, "Failed to write metrics");
        }
    }

    Ok(!outcome.has_unrecoverable_errors())
}

fn build_source(
    config: &Config,
    pool: Arc<GovernorPool>,
    transport: Arc<dyn HttpTransport>,
) -> Result<Box<dyn MetadataSource>> {
    match &config.sources.wikidata {
        Some(wikidata) => Ok(Box::new(WikidataSource::new(
            wikidata.clone(),
            config.selection.target_width,
            pool,
            transport,
        ))),
        None => bail!("no metadata source configured; add a [sources.wikidata] section"),
    }
}

/// Summary line followed by the first `limit` errors.
fn render_summary(outcome: &PipelineOutcome, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", outcome.summary_line());
    for error in outcome.errors.iter().take(limit) {
        let _ = writeln!(out, "  - {}: {}", error.title, error.message);
    }
    if outcome.errors.len() > limit {
        let _ = writeln!(out, "  ... and {} more", outcome.errors.len() - limit);
    }
    out
}

fn write_metrics(registry: &Registry, path: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    std::fs::write(path, buffer).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_core::{FailureKind, RecordError};

    fn outcome_with_errors(n: usize) -> PipelineOutcome {
        PipelineOutcome {
            attempted: n + 1,
            uploaded: 1,
            skipped: 0,
            errors: (0..n)
                .map(|i| RecordError {
                    title: format!("Work {}", i),
                    message: "HTTP 503".to_string(),
                    kind: FailureKind::Transient,
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_summary_truncates_errors() {
        let summary = render_summary(&outcome_with_errors(3), 2);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "attempted: 4, uploaded: 1, skipped: 0, errors: 3");
        assert_eq!(lines[1], "  - Work 0: HTTP 503");
        assert_eq!(lines[2], "  - Work 1: HTTP 503");
        assert_eq!(lines[3], "  ... and 1 more");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_render_summary_without_errors() {
        let summary = render_summary(&outcome_with_errors(0), 10);
        assert_eq!(summary, "attempted: 1, uploaded: 1, skipped: 0, errors: 0\n");
    }

    #[test]
    fn test_write_metrics() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.prom");
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        harvester_core::metrics::BYTES_DOWNLOADED.inc_by(10);

        write_metrics(&registry, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("harvest_bytes_downloaded_total"));
    }

    #[test]
    fn test_cli_defaults_to_harvest() {
        let cli = Cli::parse_from(["harvest", "--config", "x.toml"]);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["harvest", "retry-failed"]);
        assert_eq!(cli.command, Some(Command::RetryFailed));

        let cli = Cli::parse_from(["harvest", "harvest", "--scope", "Claude Monet"]);
        assert_eq!(
            cli.command,
            Some(Command::Harvest {
                scopes: vec!["Claude Monet".to_string()]
            })
        );
    }

    #[test]
    fn test_build_source_requires_a_source() {
        let config = Config::default();
        let pool = Arc::new(GovernorPool::from_config(&config.governor));
        let transport: Arc<dyn HttpTransport> =
            Arc::new(harvester_core::testing::MockTransport::new());
        assert!(build_source(&config, pool, transport).is_err());
    }
}
