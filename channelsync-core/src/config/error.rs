//! Configuration errors

use thiserror::Error;

/// Errors produced while loading or validating the engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for {var}: {reason}")]
    InvalidEnvValue { var: String, reason: String },

    /// The resulting configuration is not internally consistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}
