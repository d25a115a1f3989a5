//! Internal metrics server configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Where the prober's own `/metrics` endpoint listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, `host:port`
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7171".to_string(),
        }
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| self.validation_error(format!("bind_address is not host:port: {e}")))?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "server"
    }
}
