//! Configuration resolved from the environment.
//!
//! A `.env` file in the working directory is loaded first (if present), then
//! each section reads its own `DOCKHAND_*` variables.

pub(crate) mod helpers;
mod orchestrator;

pub use orchestrator::{
    DEFAULT_MONITOR_INITIAL_DELAY_MS, DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    OrchestratorConfig,
};

use url::Url;

use crate::error::ConfigError;

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load `.env` and resolve every section from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_base_url(None)
    }

    /// Like [`from_env`](Self::from_env), with `base_url` taking precedence
    /// over `DOCKHAND_BASE_URL`.
    pub fn from_env_with_base_url(base_url: Option<Url>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            orchestrator: OrchestratorConfig::resolve(base_url)?,
        })
    }
}
