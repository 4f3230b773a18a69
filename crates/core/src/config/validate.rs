use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - HTTP user agent is not empty and the timeout is not 0
/// - Bandwidth ceiling is above 0
/// - Per-variant floor does not exceed the original-quality floor
/// - Orchestrator has at least one worker
/// - A configured Wikidata source names at least one scope
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.http.user_agent.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "http.user_agent cannot be empty".to_string(),
        ));
    }

    if config.http.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "http.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.governor.bandwidth_bytes_per_sec() == 0 {
        return Err(ConfigError::ValidationError(
            "governor.bandwidth_mbps must be greater than 0".to_string(),
        ));
    }

    let selection = &config.selection;
    if selection.min_variant_long_side > selection.min_original_long_side {
        return Err(ConfigError::ValidationError(format!(
            "selection.min_variant_long_side ({}) cannot exceed selection.min_original_long_side ({})",
            selection.min_variant_long_side, selection.min_original_long_side
        )));
    }

    if config.orchestrator.max_workers == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_workers cannot be 0".to_string(),
        ));
    }

    if let Some(wikidata) = &config.sources.wikidata {
        if wikidata.scopes.is_empty() {
            return Err(ConfigError::ValidationError(
                "sources.wikidata requires at least one scope".to_string(),
            ));
        }
    }

    Ok(())
}
