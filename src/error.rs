//! Error types for the Storm Blocker engine.

use thiserror::Error;

/// Main error type for Storm Blocker operations.
#[derive(Error, Debug)]
pub enum StormError {
    /// The site is not registered
    #[error("Unknown site: {0}")]
    UnknownSite(String),

    /// Country lookup failed or timed out
    #[error("Country resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// Writing a log entry or delivering an alert failed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for StormError {
    fn from(err: config::ConfigError) -> Self {
        StormError::Config(err.to_string())
    }
}

/// Result type alias for Storm Blocker operations.
pub type Result<T> = std::result::Result<T, StormError>;
