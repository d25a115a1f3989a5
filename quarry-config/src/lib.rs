//! Domain-driven configuration for the Quarry prober
//!
//! Configuration is split by functional domain with defaults,
//! validation, YAML file loading, and `QUARRY_`-prefixed environment
//! overrides. CLI-flag overrides are applied by the binary on top.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::{
    LogFormat, LogLevel, LoggingConfig, ProbeConfig, QuarryConfig, ServerConfig, TargetConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;
