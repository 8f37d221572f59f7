use std::time::Duration;

use url::Url;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Default seconds between reconciliation ticks and between container polls.
pub const DEFAULT_MONITOR_INTERVAL_SECS: i64 = 2;

/// Default offset before a new container's first poll, so the create call
/// has settled remotely.
pub const DEFAULT_MONITOR_INITIAL_DELAY_MS: u64 = 1000;

/// Default bound on a single remote API call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: i64 = 10;

/// Remote control-plane and scheduling configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root of the remote HAL API.
    pub base_url: Url,
    /// Seconds between reconciliation ticks and container polls. Strictly positive.
    pub monitor_interval_secs: i64,
    /// Delay before a freshly created container is polled for the first time.
    pub monitor_initial_delay_ms: u64,
    /// Upper bound for any single remote call. Strictly positive.
    pub request_timeout_secs: i64,
}

impl OrchestratorConfig {
    /// Build a config with default timings, validating the interval.
    pub fn new(base_url: Url, monitor_interval_secs: i64) -> Result<Self, ConfigError> {
        let config = Self {
            base_url,
            monitor_interval_secs,
            monitor_initial_delay_ms: DEFAULT_MONITOR_INITIAL_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        };
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn resolve(base_url: Option<Url>) -> Result<Self, ConfigError> {
        let base_url = match base_url {
            Some(url) => url,
            None => {
                let raw = optional_env("DOCKHAND_BASE_URL")?.ok_or_else(|| {
                    ConfigError::MissingRequired {
                        key: "DOCKHAND_BASE_URL".to_string(),
                        hint: "Set it to the root URL of the orchestrator API".to_string(),
                    }
                })?;
                Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    key: "DOCKHAND_BASE_URL".to_string(),
                    message: format!("must be an absolute URL: {e}"),
                })?
            }
        };

        let config = Self {
            base_url,
            monitor_interval_secs: parse_optional_env(
                "DOCKHAND_MONITOR_INTERVAL_SECS",
                DEFAULT_MONITOR_INTERVAL_SECS,
            )?,
            monitor_initial_delay_ms: parse_optional_env(
                "DOCKHAND_MONITOR_INITIAL_DELAY_MS",
                DEFAULT_MONITOR_INITIAL_DELAY_MS,
            )?,
            request_timeout_secs: parse_optional_env(
                "DOCKHAND_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject non-positive intervals and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKHAND_MONITOR_INTERVAL_SECS".to_string(),
                message: format!(
                    "monitor interval must not be negative or zero (got {})",
                    self.monitor_interval_secs
                ),
            });
        }
        if self.request_timeout_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKHAND_REQUEST_TIMEOUT_SECS".to_string(),
                message: format!(
                    "request timeout must not be negative or zero (got {})",
                    self.request_timeout_secs
                ),
            });
        }
        Ok(())
    }

    /// Replace the monitoring interval, keeping the old value on failure.
    pub fn set_monitor_interval_secs(&mut self, secs: i64) -> Result<(), ConfigError> {
        let previous = self.monitor_interval_secs;
        self.monitor_interval_secs = secs;
        if let Err(e) = self.validate() {
            self.monitor_interval_secs = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.unsigned_abs())
    }

    pub fn monitor_initial_delay(&self) -> Duration {
        Duration::from_millis(self.monitor_initial_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://orchestrator.local:8080/").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::new(base(), DEFAULT_MONITOR_INTERVAL_SECS).unwrap();
        assert_eq!(config.monitor_interval(), Duration::from_secs(2));
        assert_eq!(config.monitor_initial_delay(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = OrchestratorConfig::new(base(), 0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DOCKHAND_MONITOR_INTERVAL_SECS"));
    }

    #[test]
    fn test_negative_interval_rejected() {
        assert!(OrchestratorConfig::new(base(), -5).is_err());
    }

    #[test]
    fn test_setter_keeps_previous_value_on_error() {
        let mut config = OrchestratorConfig::new(base(), 7).unwrap();
        assert!(config.set_monitor_interval_secs(0).is_err());
        assert_eq!(config.monitor_interval_secs, 7);

        config.set_monitor_interval_secs(30).unwrap();
        assert_eq!(config.monitor_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = OrchestratorConfig::new(base(), 2).unwrap();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
