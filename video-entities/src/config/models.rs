//! Configuration model definitions.
//!
//! Field names follow the camelCase keys of the shared recfluence app config
//! document, so the same JSON blob can be consumed by every job.

use crate::entity_extraction::DEFAULT_EXCLUDE_LABELS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure for the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Warehouse connection settings
    pub snowflake: SnowflakeConfig,

    /// Blob storage settings
    pub storage: StorageConfig,

    /// Seq log endpoint
    pub seq: SeqConfig,

    /// Tunables for the data scripts
    pub data_scripts: DataScriptsConfig,

    /// Run state supplied by the orchestrator
    pub state: RunState,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Environment name (dev, prod, ...)
    pub env: String,

    /// Branch suffix isolating storage and database names
    pub branch_env: Option<String>,

    /// Machine or container name running the job
    pub machine: Option<String>,

    /// When set, output stays in this directory and nothing is uploaded
    pub local_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snowflake: SnowflakeConfig::default(),
            storage: StorageConfig::default(),
            seq: SeqConfig::default(),
            data_scripts: DataScriptsConfig::default(),
            state: RunState::default(),
            logging: LoggingConfig::default(),
            env: "dev".to_string(),
            branch_env: None,
            machine: None,
            local_dir: None,
        }
    }
}

/// Snowflake connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SnowflakeConfig {
    /// Access token used as the bearer credential for the SQL API
    pub creds: String,

    /// Account host, e.g. `xy12345.east-us-2.azure.snowflakecomputing.com`
    pub host: String,

    /// Database name
    pub db: String,

    /// Virtual warehouse to run queries on
    pub warehouse: Option<String>,

    /// Default schema
    pub schema: Option<String>,

    /// Role to assume
    pub role: Option<String>,
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Azure storage connection string
    pub data_storage_cs: String,

    /// Container that receives uploads
    pub container: String,
}

/// Seq log server settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SeqConfig {
    /// Base URL of the Seq server. Empty disables shipping.
    pub seq_url: String,
}

/// Tunables for the entity extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DataScriptsConfig {
    /// Rows fetched from the cursor and processed per output file
    pub spacy_batch_size: usize,

    /// Number of blocking workers running the model
    pub workers: usize,

    /// Directory holding `config.json`, `tokenizer.json` and `model.safetensors`
    pub model_path: PathBuf,

    /// Longest token sequence fed to the model; longer texts are split into overlapping windows
    pub max_tokens: usize,

    /// Entity labels dropped from the output
    pub exclude_labels: Vec<String>,
}

impl Default for DataScriptsConfig {
    fn default() -> Self {
        Self {
            spacy_batch_size: 800,
            workers: 4,
            model_path: PathBuf::from("models/ner"),
            max_tokens: 512,
            exclude_labels: DEFAULT_EXCLUDE_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Run state handed over by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RunState {
    /// Staged files (relative to the `yt_data` stage) listing video ids to process
    pub video_paths: Option<Vec<String>>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,

    /// Log format
    pub format: LogFormat,

    /// File to log to (if any)
    pub file: Option<PathBuf>,

    /// Whether to log to stdout
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Default,
            file: None,
            stdout: true,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,

    /// Debug level
    Debug,

    /// Info level
    Info,

    /// Warn level
    Warn,

    /// Error level
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default format
    Default,

    /// JSON format
    Json,

    /// Compact format
    Compact,

    /// Pretty format
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(LogFormat::Default),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}
