//! Configuration system for the video entities job.
//!
//! The configuration document is fetched from a signed URL held in the
//! `cfg_sas` environment variable, layered over defaults with figment, and
//! then adjusted by a small set of environment overrides.

mod builder;
mod loader;
mod models;
mod validation;

pub use builder::ConfigBuilder;
pub use loader::{ConfigLoader, EnvOverrides};
pub use models::*;

/// Environment variable holding the signed URL of the configuration document
pub const CFG_SAS_VAR: &str = "cfg_sas";

/// Environment variable overriding the environment name
pub const ENV_VAR: &str = "env";

/// Environment variable holding the branch suffix for isolated runs
pub const BRANCH_ENV_VAR: &str = "branch_env";

/// Environment variable holding the run state as JSON
pub const RUN_STATE_VAR: &str = "run_state";

/// Environment variable set by Azure Container Instances with the container name
pub const MACHINE_VAR: &str = "AzureContainers_Container";

/// Environment variable redirecting output to a local directory instead of blob storage
pub const LOCAL_DIR_VAR: &str = "local_dir";

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error(
        "{0} environment variable is required. Add a .env file with the sas url to a recfluence app config file"
    )]
    MissingVariable(String),

    /// The configuration document could not be fetched
    #[error("Failed to fetch configuration: {0}")]
    FetchError(String),

    /// Error occurred during validation
    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    /// Error occurred during parsing
    #[error("Configuration parsing error: {0}")]
    ParseError(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
