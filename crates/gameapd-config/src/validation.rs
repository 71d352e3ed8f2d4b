use super::Config;
use anyhow::{anyhow, Result};

/// Validate the complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.ds_id == 0 {
        return Err(anyhow!("ds_id must be set to the node id assigned by the panel"));
    }

    if config.api_host.is_empty() {
        return Err(anyhow!("api_host cannot be empty"));
    }

    if config.api_key.is_empty() {
        return Err(anyhow!("api_key cannot be empty"));
    }

    if config.listen_port == 0 {
        return Err(anyhow!(
            "listen_port must be between 1 and 65535, got: {}",
            config.listen_port
        ));
    }

    if config.work_path.as_os_str().is_empty() {
        return Err(anyhow!("work_path cannot be empty"));
    }

    if config.task_manager.update_period.as_secs() == 0 {
        return Err(anyhow!("task_manager.update_period must be greater than 0"));
    }

    validate_log_level(&config.log_level)?;

    Ok(())
}

fn validate_log_level(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}
