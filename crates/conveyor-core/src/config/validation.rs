//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_flow(config)?;
    validate_cache(config)?;
    validate_steps(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_flow(config: &Config) -> Result<()> {
    if config.flow.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "flow.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_cache(config: &Config) -> Result<()> {
    if config.cache.enabled && config.cache.step_result_ttl_days == 0 {
        return Err(ConfigError::InvalidValue {
            field: "cache.step_result_ttl_days".to_string(),
            message: "must be at least 1 when the cache is enabled".to_string(),
        }
        .into());
    }

    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "cache.dir".to_string(),
            message: "cache directory cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_steps(config: &Config) -> Result<()> {
    for (i, step) in config.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("steps[{}].name", i),
                message: "step name cannot be empty".to_string(),
            }
            .into());
        }

        if step.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: format!("steps[{}].name", i),
                message: "step name cannot contain whitespace".to_string(),
            }
            .into());
        }

        if step.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("steps[{}].command", i),
                message: format!("step '{}' needs a command", step.name),
            }
            .into());
        }
    }

    Ok(())
}
