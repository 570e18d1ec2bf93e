//! Error types and result handling for the TireSense control plane

use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient I/O failure; retry within the same tick with bounded attempts.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A deadline elapsed. No retry within the current tick; cooldowns apply.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A reading or frame failed validation and was dropped.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An action was declined because its precondition does not hold.
    /// Not a failure; logged at info level by callers.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// An external capability is down; surfaces as a Critical incident
    /// on that component.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is retryable within the current tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Storage(_))
    }

    /// Get error category for metrics and counters
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Transient(_) => "transient",
            Error::Timeout(_) => "timeout",
            Error::Validation(_) => "validation",
            Error::Precondition(_) => "precondition",
            Error::Unavailable(_) => "unavailable",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
            Error::Generic(_) => "generic",
        }
    }
}
