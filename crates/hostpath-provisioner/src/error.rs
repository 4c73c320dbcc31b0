//! Error types for the hostpath provisioner daemon

use provision_controller::{ConfigError, ControllerError, StoreError};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup check failed
    #[error("Startup error: {0}")]
    Startup(String),

    /// Control loop error
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Background task failed
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for DaemonError {
    fn from(err: ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

impl From<StoreError> for DaemonError {
    fn from(err: StoreError) -> Self {
        DaemonError::Startup(format!("cluster store unreachable: {}", err))
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
