//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    ColloquyConfig, LogFormat, LogOutput, LoggingConfig, StorageBackend, StorageConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &ColloquyConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File {
        match &logging.file_path {
            None => return Err(ConfigError::missing_field("logging.file_path")),
            Some(path) if path.file_name().is_none() => {
                return Err(ConfigError::validation(format!(
                    "Log file path has no file name: {}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation("logging.max_files must be greater than 0"));
    }

    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "JSON log format requires the `json-log` feature",
        ));
    }

    for module in logging.filters.keys() {
        if module.trim().is_empty() || module.contains(['=', ',', ' ']) {
            return Err(ConfigError::validation(format!(
                "Invalid module in logging.filters: '{module}'"
            )));
        }
    }

    Ok(())
}

/// Validates storage settings.
fn validate_storage_config(storage: &StorageConfig) -> ConfigResult<()> {
    if storage.backend == StorageBackend::File && storage.directory.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("storage.directory"));
    }
    Ok(())
}
