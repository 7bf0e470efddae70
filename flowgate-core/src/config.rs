//! Daemon configuration: serde defaults, optional YAML file, validation.

mod defaults;
mod load;

pub use load::load_config;

use anyhow::{anyhow, Result};
use defaults::*;
use serde::Deserialize;
use std::net::SocketAddr;

/// Top-level flowgated configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP listen address.
    #[serde(default = "default_address")]
    pub address: String,

    /// Socket file external processes must use to register resources.
    #[serde(default = "default_command_socket")]
    pub command_socket: String,

    /// Server instance unique identifier, echoed in every envelope.
    /// Mandatory; there is no default.
    #[serde(default)]
    pub server_uid: String,

    /// How long (seconds) to wait for an external process reply. Doubles as
    /// the HTTP drain grace on shutdown.
    #[serde(default = "default_timeout_read_external_process")]
    pub timeout_read_external_process: u64,

    /// Log level used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            command_socket: default_command_socket(),
            server_uid: String::new(),
            timeout_read_external_process: default_timeout_read_external_process(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.address
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.address, e))?;
        if self.command_socket.trim().is_empty() {
            return Err(anyhow!("command_socket must not be empty"));
        }
        if self.timeout_read_external_process == 0 {
            return Err(anyhow!("timeout_read_external_process must be >= 1"));
        }
        Ok(())
    }
}
