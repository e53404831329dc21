//! # Video Entities
//!
//! Batch job that extracts named entities from video titles, descriptions and
//! captions stored in the Snowflake warehouse, and exports them as gzipped
//! newline-delimited JSON to local disk and Azure blob storage.
//!
//! ## Quick Start
//!
//! ```no_run
//! use video_entities::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load().await?;
//!
//!     let extractor = EntityExtractor::from_config(&config.data_scripts)?;
//!     let warehouse = SnowflakeClient::connect(&config.snowflake)?;
//!     let blob = AzureBlobStore::from_config(&config.storage)?;
//!
//!     let pipeline = VideoEntitiesPipeline::new(config, extractor, Box::new(blob));
//!     let summary = pipeline.run(Box::new(warehouse), &[]).await?;
//!     println!("wrote {} files", summary.files.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **config**: remote JSON document merged with environment overrides
//! - **entity_extraction**: pretrained token classifier behind a batch API
//! - **warehouse**: SQL over the Snowflake REST API with a paging cursor
//! - **storage**: write-only blob uploads
//! - **pipeline**: query batches, page processing, file export

pub mod config;
pub mod entity_extraction;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod warehouse;

/// The prelude re-exports commonly used types for convenience
pub mod prelude {
    pub use crate::config::{
        AppConfig, DataScriptsConfig, LogFormat, LogLevel, LoggingConfig, RunState,
        SnowflakeConfig, StorageConfig,
    };

    pub use crate::entity_extraction::{
        BertTokenClassifier, Entity, EntityExtractor, RawSpan, TokenClassifier,
    };

    pub use crate::pipeline::{Part, RunSummary, VideoEntitiesPipeline, VideoEntity};

    pub use crate::storage::{AzureBlobStore, BlobStore, DisabledBlobStore};

    pub use crate::warehouse::{RowCursor, SnowflakeClient, Warehouse};

    pub use crate::{Error, Result};
}

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error type for video entity extraction runs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Logging setup failed
    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LogError),

    /// Warehouse connection or query failure
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// Model loading or inference failure
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Blob upload failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A row or caption payload did not have the expected shape
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local file system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<crate::warehouse::WarehouseError> for Error {
    fn from(err: crate::warehouse::WarehouseError) -> Self {
        Error::Warehouse(err.to_string())
    }
}

impl From<crate::storage::StorageError> for Error {
    fn from(err: crate::storage::StorageError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        Error::Extraction(err.to_string())
    }
}

/// Result type for video entity operations
pub type Result<T> = std::result::Result<T, Error>;
