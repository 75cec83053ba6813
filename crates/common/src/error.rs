//! Common error types for the failover controller.

use std::fmt;

/// A specialized Result type for failover operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for failover operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failover of {service} failed: {message}")]
    Failover { service: String, message: String },

    #[error("Recovery of {service} failed: {message}")]
    Recovery { service: String, message: String },

    #[error("{} errors: {}", .0.len(), join(.0))]
    Multiple(Vec<Error>),

    #[error("Unknown error: {0}")]
    Other(String),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a failover action error for the named service.
    pub fn failover(service: impl Into<String>, msg: impl fmt::Display) -> Self {
        Error::Failover {
            service: service.into(),
            message: msg.to_string(),
        }
    }

    /// Create a recovery action error for the named service.
    pub fn recovery(service: impl Into<String>, msg: impl fmt::Display) -> Self {
        Error::Recovery {
            service: service.into(),
            message: msg.to_string(),
        }
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is exactly one, `Multiple` otherwise.
    pub fn collect(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// Whether this error came from a failover or recovery action.
    pub fn is_adapter_failure(&self) -> bool {
        match self {
            Error::Failover { .. } | Error::Recovery { .. } => true,
            Error::Multiple(errors) => errors.iter().all(Error::is_adapter_failure),
            _ => false,
        }
    }
}
