//! Error types of the dispatch engine.

use courier_transport::{TransportError, ValidationError};

/// Standard result type for dispatch engine operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by the dispatch engine
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Unknown send strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl BusError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if error is a misconfiguration the caller has to fix
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownStrategy { .. } | Self::Configuration(_))
    }
}

/// Settings loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Missing required value: {field}")]
    Missing { field: String },

    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Error returned by an application message handler.
///
/// Wraps any error type so handlers can use `?` on their own failures.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error
    pub fn from_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            source: Some(error.into()),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
