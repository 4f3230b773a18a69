//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the ingestion orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Scopes processed concurrently. Workers share the same governors.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long every worker pauses after a record fails with a rate limit
    /// (seconds).
    #[serde(default = "default_cooldown")]
    pub rate_limit_cooldown_secs: u64,

    /// Errors printed in the run summary.
    #[serde(default = "default_error_summary_limit")]
    pub error_summary_limit: usize,
}

fn default_max_workers() -> usize {
    2
}

fn default_cooldown() -> u64 {
    120
}

fn default_error_summary_limit() -> usize {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            rate_limit_cooldown_secs: default_cooldown(),
            error_summary_limit: default_error_summary_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.rate_limit_cooldown_secs, 120);
        assert_eq!(config.error_summary_limit, 10);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            max_workers = 4
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.rate_limit_cooldown_secs, 120);
    }
}
