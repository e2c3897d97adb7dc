//! Error types for transport operations.

use std::time::Duration;
use thiserror::Error;

/// Error type for all transport and administration operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Destination not found: {name}")]
    DestinationNotFound { name: String },

    #[error("Subscription '{subscription}' not found on topic '{topic}'")]
    SubscriptionNotFound { topic: String, subscription: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("{entity} is closed")]
    Closed { entity: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check if error is transient and the operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DestinationNotFound { .. } => false,
            Self::SubscriptionNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::Closed { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::Unsupported { .. } => false,
            Self::ProviderError { .. } => true,
            Self::Validation(_) => false,
        }
    }
}

/// Validation errors for destination names and message fields
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
