//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading configuration file
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// YAML parsing error
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Environment variable error
    #[error("environment variable error: {0}")]
    Env(String),

    /// Domain-specific configuration error
    #[error("invalid {domain} configuration: {message}")]
    Domain { domain: String, message: String },
}
