//! Configuration loading and environment variable handling

use crate::domains::QuarryConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with the default `QUARRY` prefix
    pub fn new() -> Self {
        Self {
            prefix: "QUARRY".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<QuarryConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: QuarryConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from defaults plus environment overrides
    pub fn from_env(&self) -> ConfigResult<QuarryConfig> {
        let mut config = QuarryConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<QuarryConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut QuarryConfig) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("TARGET_URL") {
            config.target.url = url;
        }

        if let Ok(timeout) = self.get_env_var("TARGET_TIMEOUT") {
            config.target.timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::Env(format!("invalid TARGET_TIMEOUT: {e}")))?;
        }

        if let Ok(interval) = self.get_env_var("PROBE_INTERVAL") {
            config.probe.interval = humantime::parse_duration(&interval)
                .map_err(|e| ConfigError::Env(format!("invalid PROBE_INTERVAL: {e}")))?;
        }

        if let Ok(bind) = self.get_env_var("SERVER_BIND_ADDRESS") {
            config.server.bind_address = bind;
        }

        if let Ok(level) = self.get_env_var("LOG_LEVEL") {
            config.logging.level = crate::domains::LogLevel::from_str(&level)
                .map_err(|e| ConfigError::Env(format!("invalid LOG_LEVEL: {e}")))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.logging.format = crate::domains::LogFormat::from_str(&format)
                .map_err(|e| ConfigError::Env(format!("invalid LOG_FORMAT: {e}")))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_with_no_overrides_is_the_default() {
        // Unique prefix so stray QUARRY_* variables can't interfere.
        let config = ConfigLoader::with_prefix("QUARRY_TEST_NONE")
            .from_env()
            .unwrap();
        assert_eq!(config.target.url, "http://localhost:7070");
        assert_eq!(config.probe.interval, std::time::Duration::from_secs(10));
    }

    #[test]
    fn env_overrides_beat_defaults() {
        std::env::set_var("QUARRY_TEST_OVR_TARGET_URL", "http://parca.example:7070");
        std::env::set_var("QUARRY_TEST_OVR_PROBE_INTERVAL", "30s");

        let config = ConfigLoader::with_prefix("QUARRY_TEST_OVR")
            .from_env()
            .unwrap();
        assert_eq!(config.target.url, "http://parca.example:7070");
        assert_eq!(config.probe.interval, std::time::Duration::from_secs(30));

        std::env::remove_var("QUARRY_TEST_OVR_TARGET_URL");
        std::env::remove_var("QUARRY_TEST_OVR_PROBE_INTERVAL");
    }

    #[test]
    fn malformed_duration_override_errors() {
        std::env::set_var("QUARRY_TEST_BAD_PROBE_INTERVAL", "soon");

        let result = ConfigLoader::with_prefix("QUARRY_TEST_BAD").from_env();
        assert!(matches!(result, Err(ConfigError::Env(_))));

        std::env::remove_var("QUARRY_TEST_BAD_PROBE_INTERVAL");
    }

    fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("quarry.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn from_file_loads_yaml_over_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "target:\n  url: http://parca.file:7070\nprobe:\n  interval: 20s\n",
        );

        let config = ConfigLoader::with_prefix("QUARRY_TEST_FILE")
            .from_file(path)
            .unwrap();
        assert_eq!(config.target.url, "http://parca.file:7070");
        assert_eq!(config.probe.interval, std::time::Duration::from_secs(20));
        // Untouched domains keep their defaults.
        assert_eq!(config.server.bind_address, "127.0.0.1:7171");
    }

    #[test]
    fn env_overrides_beat_file_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(&dir, "target:\n  url: http://parca.file:7070\n");
        std::env::set_var("QUARRY_TEST_PRI_TARGET_URL", "http://parca.env:7070");

        let config = ConfigLoader::with_prefix("QUARRY_TEST_PRI")
            .from_file(path)
            .unwrap();
        assert_eq!(config.target.url, "http://parca.env:7070");

        std::env::remove_var("QUARRY_TEST_PRI_TARGET_URL");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ConfigLoader::with_prefix("QUARRY_TEST_MISSING")
            .from_file("/nonexistent/quarry.yaml");
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }
}
