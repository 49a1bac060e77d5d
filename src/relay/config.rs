// Relay server configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Flat directory holding uploaded files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// `id password` file consulted on every login
    #[serde(default = "default_credentials")]
    pub credentials: PathBuf,
    /// Frames buffered per session before new ones are dropped
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Optional file receiving a copy of every log line
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

fn default_max_sessions() -> usize {
    10
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("server_storage")
}

fn default_credentials() -> PathBuf {
    PathBuf::from("users.txt")
}

fn default_outbound_queue() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_sessions: default_max_sessions(),
            storage_dir: default_storage_dir(),
            credentials: default_credentials(),
            outbound_queue: default_outbound_queue(),
            log_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            anyhow::bail!("max_sessions must be at least 1");
        }
        if self.outbound_queue == 0 {
            anyhow::bail!("outbound_queue must be at least 1");
        }
        Ok(())
    }
}
