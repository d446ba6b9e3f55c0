//! Error types for tlsgate
//!
//! Configuration-level failures shared by the config and proxy crates. The
//! certificate core keeps its own error taxonomy next to the code that
//! produces it.

use thiserror::Error;

/// Main error type for tlsgate configuration and setup
#[derive(Error, Debug)]
pub enum TlsgateError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A hostname that cannot be used as a certificate subject
    #[error("Invalid domain name '{input}': {reason}")]
    InvalidDomain { input: String, reason: &'static str },
}

impl TlsgateError {
    /// Shorthand for a configuration error without an underlying source
    pub fn config(message: impl Into<String>) -> Self {
        TlsgateError::Config {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for tlsgate operations
pub type TlsgateResult<T> = Result<T, TlsgateError>;
