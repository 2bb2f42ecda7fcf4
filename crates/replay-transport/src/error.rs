//! Error types for transport operations.

use thiserror::Error;

/// Error type for all publisher and work-queue operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Transport unavailable: {message}")]
    Unavailable { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Whether the same call may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            // Throttling and 5xx from the backend
            Self::ProviderError { .. } => true,
            Self::MessageNotFound { .. }
            | Self::MessageTooLarge { .. }
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Validation(_) => false,
        }
    }
}

/// Failure to encode a message body
#[derive(Debug, Error)]
#[error("JSON serialization failed: {0}")]
pub struct SerializationError(#[from] serde_json::Error);

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Name and field validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Failure reported by a [`crate::MessageHandler`].
///
/// The consumer only needs the description; the handler owns any richer
/// error type and converts at its boundary.
#[derive(Debug, Clone, Error)]
#[error("Message handler failed: {message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
