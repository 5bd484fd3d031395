//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating a `ScalingConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// One message per violated field, in declaration order.
    #[error("input is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// The individual field violations, if this is a validation error.
    pub fn violations(&self) -> &[String] {
        match self {
            ConfigError::Invalid(v) => v,
            _ => &[],
        }
    }
}
