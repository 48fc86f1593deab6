//! Error types for the learning core
//!
//! Every public operation either resolves or fails with one of four kinds:
//! validation, I/O, knowledge-store integration, or configuration.

use thiserror::Error;

/// Main error type for outcome logging and card evaluation
#[derive(Error, Debug)]
pub enum LearningError {
    /// Malformed outcome record, bad cleanup argument, bad filter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Log sink, export, archive or snapshot I/O failed
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A knowledge store call failed
    #[error("Knowledge store error during {operation}: {source}")]
    Integration {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Configuration rejected before construction
    #[error("Configuration error: {}", .0.join("; "))]
    Config(Vec<String>),
}

/// Result type alias for learning core operations
pub type Result<T> = std::result::Result<T, LearningError>;

impl LearningError {
    pub fn validation(message: impl Into<String>) -> Self {
        LearningError::Validation(message.into())
    }

    pub fn io(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        LearningError::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn integration(operation: &'static str, source: anyhow::Error) -> Self {
        LearningError::Integration { operation, source }
    }

    /// Whether this error came from the knowledge store
    pub fn is_integration(&self) -> bool {
        matches!(self, LearningError::Integration { .. })
    }
}
