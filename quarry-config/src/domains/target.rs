//! Target query service configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive_duration, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where to send probe queries and how long to wait for each one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the query service
    pub url: String,

    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout: default_timeout(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:7070".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Validatable for TargetConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url(&self.url, "url", self.domain_name())?;
        validate_positive_duration(self.timeout, "timeout", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "target"
    }
}
