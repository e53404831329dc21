//! Configuration builder.
//!
//! Builds an [`AppConfig`] in code, for embedding the pipeline without a
//! remote configuration document.

use super::{Result, models::*, validation};
use std::path::Path;

/// Builder for creating AppConfig instances.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Set the warehouse connection.
    pub fn with_snowflake(mut self, host: &str, db: &str, creds: &str) -> Self {
        self.config.snowflake.host = host.to_string();
        self.config.snowflake.db = db.to_string();
        self.config.snowflake.creds = creds.to_string();
        self
    }

    /// Set the blob storage connection string and container.
    pub fn with_storage(mut self, connection_string: &str, container: &str) -> Self {
        self.config.storage.data_storage_cs = connection_string.to_string();
        self.config.storage.container = container.to_string();
        self
    }

    /// Keep output in a local directory and skip uploads.
    pub fn with_local_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.local_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the number of rows processed per output file.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.data_scripts.spacy_batch_size = size;
        self
    }

    /// Set the staged video files to process.
    pub fn with_video_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.state.video_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Set the model directory.
    pub fn with_model_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_scripts.model_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the log level.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<AppConfig> {
        validation::validate_config(&self.config)?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
