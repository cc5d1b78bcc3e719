use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port and upload limit are not 0
/// - Converter timeout is not 0 and a target format is set
/// - The worker pool has at least one slot
/// - At least one input extension is accepted
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.server.max_upload_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "server.max_upload_bytes cannot be 0".to_string(),
        ));
    }

    if config.converter.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "converter.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.converter.target_format.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "converter.target_format cannot be empty".to_string(),
        ));
    }

    if config.orchestrator.max_parallel_units == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_parallel_units cannot be 0".to_string(),
        ));
    }

    if config.orchestrator.accepted_extensions.is_empty() {
        return Err(ConfigError::ValidationError(
            "orchestrator.accepted_extensions cannot be empty".to_string(),
        ));
    }

    Ok(())
}
