//! Error types for the search engine.

use thiserror::Error;

use crate::types::Signal;

/// Result type alias using FusionError.
pub type Result<T> = std::result::Result<T, FusionError>;

/// Errors that can occur in the search engine.
#[derive(Error, Debug)]
pub enum FusionError {
    /// Malformed upsert input or out-of-range search parameters.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Identity already belongs to a different tenant.
    #[error("Object {key} belongs to yacht {owner}, not {requested}")]
    TenantMismatch {
        key: String,
        owner: String,
        requested: String,
    },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding provider error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Embedding provider did not answer in time.
    #[error("Embedding provider timed out after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    /// One retrieval signal could not be computed.
    #[error("Signal {signal} unavailable: {message}")]
    SignalUnavailable { signal: Signal, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl FusionError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a signal-unavailable error.
    pub fn signal_unavailable(signal: Signal, message: impl Into<String>) -> Self {
        Self::SignalUnavailable {
            signal,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Embedding { .. } | Self::EmbeddingTimeout { .. } | Self::Database { .. } | Self::Io(_)
        )
    }

    /// Get the error code for tool responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::EmbeddingTimeout { .. } => "EMBEDDING_TIMEOUT",
            Self::SignalUnavailable { .. } => "SIGNAL_UNAVAILABLE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FusionError::TenantMismatch {
            key: "work_order/wo-1".to_string(),
            owner: "y1".to_string(),
            requested: "y2".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("work_order/wo-1"));
        assert!(text.contains("y2"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FusionError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(FusionError::database("x").error_code(), "DATABASE_ERROR");
        assert_eq!(
            FusionError::signal_unavailable(Signal::Vector, "down").error_code(),
            "SIGNAL_UNAVAILABLE"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(FusionError::embedding("503").is_transient());
        assert!(FusionError::EmbeddingTimeout { timeout_ms: 10 }.is_transient());
        assert!(!FusionError::validation("bad").is_transient());
    }
}
