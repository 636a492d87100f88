//! Error types for PhishGuard configuration

use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required key missing in production
    #[error("missing required configuration: {0}")]
    MissingKey(&'static str),

    /// Value present but unparseable
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
