//! Error types for the Floodgate engine.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule store errors (lookup failures, backend unavailability)
    #[error("Rule store error: {0}")]
    RuleStore(String),

    /// A bounded operation did not complete in time
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Audit sink failures (always swallowed by the dispatcher)
    #[error("Audit error: {0}")]
    Audit(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
