use super::{types::Config, ConfigError};

/// Longest accepted cache entry lifetime (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Cache TTL is within 1 second and [`MAX_CACHE_TTL_SECS`], purge interval is positive
/// - Engine sizing and timing values are positive
/// - Progress milestone step is within (0, 100]
/// - At least one input format is accepted
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.cache.ttl_secs == 0 || config.cache.ttl_secs > MAX_CACHE_TTL_SECS {
        return Err(ConfigError::ValidationError(format!(
            "cache.ttl_secs must be between 1 and {}",
            MAX_CACHE_TTL_SECS
        )));
    }
    if config.cache.purge_interval_secs == 0 {
        return Err(invalid("cache.purge_interval_secs cannot be 0"));
    }

    let engine = &config.engine;
    if engine.workers == 0 {
        return Err(invalid("engine.workers must be at least 1"));
    }
    if engine.batch_size == 0 {
        return Err(invalid("engine.batch_size must be at least 1"));
    }
    if engine.queue_capacity == 0 {
        return Err(invalid("engine.queue_capacity must be at least 1"));
    }
    if engine.scan_interval_ms == 0 {
        return Err(invalid("engine.scan_interval_ms cannot be 0"));
    }
    if engine.conversion_timeout_secs == 0 {
        return Err(invalid("engine.conversion_timeout_secs cannot be 0"));
    }
    if engine.probe_timeout_secs == 0 {
        return Err(invalid("engine.probe_timeout_secs cannot be 0"));
    }
    if engine.progress_milestone_pct == 0 || engine.progress_milestone_pct > 100 {
        return Err(invalid(
            "engine.progress_milestone_pct must be between 1 and 100",
        ));
    }

    if config.converter.supported_input_formats.is_empty() {
        return Err(invalid(
            "converter.supported_input_formats cannot be empty",
        ));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
