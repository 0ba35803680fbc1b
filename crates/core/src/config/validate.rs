use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Queue capacity and worker count are nonzero
/// - Configured service URLs are non-empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.pipeline.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.queue_capacity cannot be 0".to_string(),
        ));
    }

    if config.pipeline.workers.workers == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.workers.workers cannot be 0".to_string(),
        ));
    }

    for (name, service) in [("caption", &config.caption), ("narrative", &config.narrative)] {
        if let Some(service) = service {
            if service.url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{}.url cannot be empty",
                    name
                )));
            }
        }
    }

    Ok(())
}
