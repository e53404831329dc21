//! Configuration validation utilities.

use super::ConfigError;
use super::models::*;
use crate::entity_extraction::MIN_WINDOW_TOKENS;

/// Validate the entire configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_snowflake_config(&config.snowflake)?;
    validate_storage_config(config)?;
    validate_data_scripts_config(&config.data_scripts)?;

    Ok(())
}

fn validate_snowflake_config(config: &SnowflakeConfig) -> Result<(), ConfigError> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "snowflake.host cannot be empty".to_string(),
        ));
    }
    if config.db.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "snowflake.db cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Storage settings are only needed when uploading.
fn validate_storage_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.local_dir.is_some() {
        return Ok(());
    }

    if config.storage.container.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.container cannot be empty".to_string(),
        ));
    }
    if config.storage.data_storage_cs.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.dataStorageCs cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_data_scripts_config(config: &DataScriptsConfig) -> Result<(), ConfigError> {
    if config.spacy_batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "dataScripts.spacyBatchSize must be greater than 0".to_string(),
        ));
    }
    if config.workers == 0 {
        return Err(ConfigError::ValidationError(
            "dataScripts.workers must be greater than 0".to_string(),
        ));
    }
    if config.max_tokens < MIN_WINDOW_TOKENS {
        return Err(ConfigError::ValidationError(format!(
            "dataScripts.maxTokens must be at least {}",
            MIN_WINDOW_TOKENS
        )));
    }

    Ok(())
}
