//! Types for the ingestion orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::FailureKind;
use crate::persistence::StoredObject;

/// Errors that stop a whole scope, as opposed to a single record.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("source error: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    #[error("persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),
}

/// Why a record was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The source identifier is already linked to a stored record.
    AlreadyStored,
    /// No rendition passed the variant selector.
    NoQualifyingVariant,
    /// Upstream answered 404/410, or the source no longer lists the title.
    NotFound,
    /// The downloaded image is smaller than its metadata claimed.
    InvalidDimensions { width: u32, height: u32 },
    /// Persistence rejected the write as a duplicate.
    AlreadyExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyStored => write!(f, "already stored"),
            SkipReason::NoQualifyingVariant => write!(f, "no qualifying variant"),
            SkipReason::NotFound => write!(f, "image not found"),
            SkipReason::InvalidDimensions { width, height } => {
                write!(f, "downloaded image too small ({}x{})", width, height)
            }
            SkipReason::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// A per-record failure surfaced in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub title: String,
    pub message: String,
    pub kind: FailureKind,
}

/// Result of driving one record through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Uploaded { record_id: i64, object: StoredObject },
    Skipped(SkipReason),
    Failed(RecordError),
}

impl RecordOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Uploaded { .. } => "uploaded",
            RecordOutcome::Skipped(_) => "skipped",
            RecordOutcome::Failed(_) => "error",
        }
    }
}

/// Run-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Records handed to the orchestrator.
    pub attempted: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

impl PipelineOutcome {
    /// Count one record's outcome.
    pub fn record(&mut self, outcome: &RecordOutcome) {
        self.attempted += 1;
        match outcome {
            RecordOutcome::Uploaded { .. } => self.uploaded += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
            RecordOutcome::Failed(error) => self.errors.push(error.clone()),
        }
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: PipelineOutcome) {
        self.attempted += other.attempted;
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    pub fn summary_line(&self) -> String {
        format!(
            "attempted: {}, uploaded: {}, skipped: {}, errors: {}",
            self.attempted,
            self.uploaded,
            self.skipped,
            self.errors.len()
        )
    }

    /// Whether any error is neither a rate limit nor transient.
    pub fn has_unrecoverable_errors(&self) -> bool {
        self.errors.iter().any(|e| e.kind == FailureKind::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(kind: FailureKind) -> RecordError {
        RecordError {
            title: "Haystacks".to_string(),
            message: "boom".to_string(),
            kind,
        }
    }

    #[test]
    fn test_record_and_summary() {
        let mut outcome = PipelineOutcome::default();
        outcome.record(&RecordOutcome::Skipped(SkipReason::AlreadyStored));
        outcome.record(&RecordOutcome::Uploaded {
            record_id: 1,
            object: StoredObject {
                path: "a/b.png".to_string(),
                public_url: "https://cdn.example.org/a/b.png".to_string(),
            },
        });
        outcome.record(&RecordOutcome::Failed(error(FailureKind::Transient)));

        assert_eq!(
            outcome.summary_line(),
            "attempted: 3, uploaded: 1, skipped: 1, errors: 1"
        );
        assert!(!outcome.has_unrecoverable_errors());
    }

    #[test]
    fn test_merge() {
        let mut a = PipelineOutcome {
            attempted: 2,
            uploaded: 1,
            skipped: 1,
            errors: Vec::new(),
        };
        let b = PipelineOutcome {
            attempted: 1,
            uploaded: 0,
            skipped: 0,
            errors: vec![error(FailureKind::Fatal)],
        };
        a.merge(b);
        assert_eq!(a.attempted, 3);
        assert_eq!(a.errors.len(), 1);
        assert!(a.has_unrecoverable_errors());
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::NoQualifyingVariant.to_string(),
            "no qualifying variant"
        );
        assert_eq!(
            SkipReason::InvalidDimensions {
                width: 800,
                height: 600
            }
            .to_string(),
            "downloaded image too small (800x600)"
        );
    }
}
