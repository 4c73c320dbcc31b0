//! Error types for the provisioning controller

use thiserror::Error;

/// Cluster store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store unreachable
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a provisioning backend.
///
/// `NotReady` and `Ignored` are not failures: the first is backpressure, the
/// second means this instance has no authority over the asset.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Backend cannot act yet; retry later without counting a failure
    #[error("Backend not ready: {0}")]
    NotReady(String),

    /// Asset belongs to someone else; drop without retry
    #[error("Ignored: {reason}")]
    Ignored { reason: String },

    /// Backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }

    /// Whether the error counts against the failure budget
    pub fn is_counted(&self) -> bool {
        matches!(self, ProvisionError::Backend(_) | ProvisionError::Io(_))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is mandatory")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Controller-level errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Backend error
    #[error("Provisioner error: {0}")]
    Provision(#[from] ProvisionError),

    /// Worker task failed
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;
