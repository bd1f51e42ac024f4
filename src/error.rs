//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A limiter parameter is outside its valid range
    #[error("Invalid parameter `{parameter}`: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter
        parameter: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A limit type string is not one of `token_bucket`, `fixed_window` or `none`
    #[error("Unknown limit type: {0:?}")]
    UnknownLimitType(String),

    /// Configuration document errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }

    /// Check if the error was caused by rejected configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::UnknownLimitType(_) | Self::Config(_)
        )
    }
}

impl From<serde_yaml::Error> for TollgateError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
