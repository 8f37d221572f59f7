//! Error types for the orchestrator core.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote catalog error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Monitor registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Configuration errors. Always fatal to startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reported by the remote control-plane API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport or connectivity failure, including timeouts and 5xx responses.
    #[error("Remote API unavailable: {reason}")]
    Unavailable { reason: String },

    /// The API understood the request and refused it.
    #[error("Remote API rejected the request (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Remote resource not found: {resource}")]
    NotFound { resource: String },

    /// Malformed document or a link relation that is not advertised.
    #[error("Invalid response from remote API: {reason}")]
    InvalidResponse { reason: String },
}

impl RemoteError {
    pub fn timed_out(operation: &str, timeout: Duration) -> Self {
        Self::Unavailable {
            reason: format!("{operation} timed out after {timeout:?}"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Monitor registry consistency violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Container '{name}' is already monitored")]
    AlreadyMonitored { name: String },

    #[error("Container '{name}' is not monitored")]
    NotMonitored { name: String },

    #[error("Monitor registry is shut down")]
    Closed,
}

/// Failures from the persistence and application collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store operation '{operation}' failed: {reason}")]
    OperationFailed { operation: String, reason: String },
}

/// Errors surfaced to callers of the container lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Remote and local monitoring state disagree and the caller must act.
    #[error("Consistency error for container '{name}': {reason}")]
    Consistency {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },
}

impl LifecycleError {
    pub fn consistency(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Consistency {
            name: name.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn consistency_from(
        name: impl Into<String>,
        reason: impl Into<String>,
        source: impl Into<Error>,
    ) -> Self {
        Self::Consistency {
            name: name.into(),
            reason: reason.into(),
            source: Some(Box::new(source.into())),
        }
    }

    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
