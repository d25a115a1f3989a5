//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Domain {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{field_name} cannot be empty"),
        });
    }
    Ok(())
}

/// Validate a non-zero duration
pub fn validate_positive_duration(
    value: Duration,
    field_name: &str,
    domain: &str,
) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{field_name} must be greater than 0"),
        });
    }
    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    url::Url::parse(url).map_err(|e| ConfigError::Domain {
        domain: domain.to_string(),
        message: format!("{field_name} has invalid URL format: {e}"),
    })?;

    Ok(())
}
