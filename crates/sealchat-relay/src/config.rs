use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use sealchat_core::directory::{DirectoryConfig, DEFAULT_MAX_USERNAME_LEN};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    // Per-socket limits
    pub max_frame_bytes: usize,
    pub outbound_queue_len: usize,

    // Directory
    pub max_username_len: usize,

    // Graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_frame_bytes: 64 * 1024, // 64KB
            outbound_queue_len: 256,
            max_username_len: DEFAULT_MAX_USERNAME_LEN,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SEALCHAT_LISTEN_ADDR") {
            config.listen_addr = addr.parse()?;
        }

        if let Ok(size) = std::env::var("SEALCHAT_MAX_FRAME_BYTES") {
            config.max_frame_bytes = size.parse()?;
        }

        if let Ok(len) = std::env::var("SEALCHAT_MAX_USERNAME_LEN") {
            config.max_username_len = len.parse()?;
        }

        if let Ok(len) = std::env::var("SEALCHAT_OUTBOUND_QUEUE_LEN") {
            config.outbound_queue_len = len.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_frame_bytes == 0 {
            anyhow::bail!("max_frame_bytes must be > 0");
        }

        if self.outbound_queue_len == 0 {
            anyhow::bail!("outbound_queue_len must be > 0");
        }

        if self.max_username_len == 0 {
            anyhow::bail!("max_username_len must be > 0");
        }

        Ok(())
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            max_username_len: self.max_username_len,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
