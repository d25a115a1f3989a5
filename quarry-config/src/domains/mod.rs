//! Domain-specific configuration modules

pub mod logging;
pub mod probe;
pub mod server;
pub mod target;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use probe::ProbeConfig;
pub use server::ServerConfig;
pub use target::TargetConfig;

/// Complete prober configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    /// Target query service
    pub target: TargetConfig,

    /// Probe pipeline
    pub probe: ProbeConfig,

    /// Internal metrics server
    pub server: ServerConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl QuarryConfig {
    /// Validate every domain.
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.target.validate()?;
        self.probe.validate()?;
        self.server.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
