//! Configuration loader.
//!
//! Layers the fetched configuration document over defaults and applies the
//! environment overrides used by the container orchestrator.

use super::{
    BRANCH_ENV_VAR, CFG_SAS_VAR, ConfigError, ENV_VAR, LOCAL_DIR_VAR, MACHINE_VAR, RUN_STATE_VAR,
    Result, models::*, validation,
};
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use std::path::PathBuf;
use tracing::{debug, info};

/// Configuration loader that layers defaults and the configuration document.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    figment: Figment,
}

impl ConfigLoader {
    /// Create a new configuration loader with default values.
    pub fn new() -> Self {
        let figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        Self { figment }
    }

    /// Merge a JSON configuration document over the current layers.
    pub fn load_json(&mut self, document: &str) -> &mut Self {
        let figment = std::mem::take(&mut self.figment).merge(Json::string(document));
        self.figment = figment;
        self
    }

    /// Fetch the configuration document from `url` and merge it.
    ///
    /// No retries: any transport failure or non-success status is returned
    /// immediately.
    pub async fn fetch(&mut self, url: &str) -> Result<&mut Self> {
        // the query string carries the SAS signature, keep it out of the logs
        let host = url::Url::parse(url)
            .map_err(|e| ConfigError::FetchError(format!("invalid configuration url: {}", e)))?
            .host_str()
            .unwrap_or_default()
            .to_string();
        debug!(host = %host, "fetching configuration document");

        let response = reqwest::get(url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConfigError::FetchError(e.without_url().to_string()))?;
        let document = response
            .text()
            .await
            .map_err(|e| ConfigError::FetchError(e.without_url().to_string()))?;

        Ok(self.load_json(&document))
    }

    /// Extract the configuration, apply `overrides`, qualify branch names and
    /// validate the result.
    pub fn extract(&self, overrides: EnvOverrides) -> Result<AppConfig> {
        let mut config: AppConfig = self
            .figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        overrides.apply(&mut config);
        qualify_branch_names(&mut config);

        validation::validate_config(&config)?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AppConfig {
    /// Load the configuration from the document referenced by `cfg_sas`.
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub async fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::load_with(|key| std::env::var(key).ok()).await
    }

    /// Load the configuration reading environment variables through `lookup`.
    pub async fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(CFG_SAS_VAR)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingVariable(CFG_SAS_VAR.to_string()))?;
        let overrides = EnvOverrides::from_lookup(&lookup)?;

        let mut loader = ConfigLoader::new();
        loader.fetch(&url).await?;
        let config = loader.extract(overrides)?;

        info!(
            env = %config.env,
            branch_env = config.branch_env.as_deref().unwrap_or(""),
            db = %config.snowflake.db,
            container = %config.storage.container,
            "configuration loaded"
        );

        Ok(config)
    }
}

/// Values taken from the process environment that override the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    /// Environment name
    pub env: Option<String>,
    /// Branch suffix
    pub branch_env: Option<String>,
    /// Run state; replaces the document's state even when empty
    pub run_state: RunState,
    /// Container name, or the local host name
    pub machine: String,
    /// Local output directory; replaces the document's value even when absent
    pub local_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read the overrides through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let run_state = match non_empty(RUN_STATE_VAR) {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| ConfigError::ParseError(format!("{}: {}", RUN_STATE_VAR, e)))?,
            None => RunState::default(),
        };

        let machine = non_empty(MACHINE_VAR)
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());

        Ok(Self {
            env: non_empty(ENV_VAR),
            branch_env: non_empty(BRANCH_ENV_VAR),
            run_state,
            machine,
            local_dir: non_empty(LOCAL_DIR_VAR).map(PathBuf::from),
        })
    }

    fn apply(self, config: &mut AppConfig) {
        if let Some(env) = self.env {
            config.env = env;
        } else if config.env.is_empty() {
            config.env = "dev".to_string();
        }

        config.branch_env = self
            .branch_env
            .or_else(|| config.branch_env.take())
            .filter(|b| !b.is_empty());
        config.state = self.run_state;
        config.machine = Some(self.machine);
        config.local_dir = self.local_dir;
    }
}

/// Suffix the container and database names with the branch, if any.
fn qualify_branch_names(config: &mut AppConfig) {
    if let Some(branch) = &config.branch_env {
        config.storage.container = format!("{}-{}", config.storage.container, branch);
        config.snowflake.db = format!("{}_{}", config.snowflake.db, branch);
    }
}
