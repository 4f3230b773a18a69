//! Ingestion orchestrator: drives source records into persistence.
//!
//! - **Records**: sequential within a scope
//! - **Scopes**: bounded pool of `max_workers`, all sharing one set of
//!   governors
//! - **Failures**: isolated per record and written to the failure ledger

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::IngestionOrchestrator;
pub use types::{OrchestratorError, PipelineOutcome, RecordError, RecordOutcome, SkipReason};
